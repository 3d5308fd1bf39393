//! Connect, measure and disconnect for a single location.
//!
//! ```text
//! Idle -> Connecting -> Connected -> Measuring -> Measured      -> Disconnecting -> Done
//!             |                              \-> MeasureFailed -/
//!             \-> Done (connect failed: no proxy, no measurement)
//! ```

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::{
    catalog::Location,
    error::error_chain,
    meter::SpeedMeter,
    record::MeasurementRecord,
    transport::{NetworkPath, SocksEndpoint},
    vpn::VpnControl,
};

/// Steps of one cycle, logged at debug as they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Not started.
    Idle,
    /// `connect` issued.
    Connecting,
    /// Tunnel up.
    Connected,
    /// Proxy installed, meter running.
    Measuring,
    /// Meter returned results.
    Measured,
    /// Meter failed.
    MeasureFailed,
    /// `disconnect` issued.
    Disconnecting,
    /// Cycle over.
    Done,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Row ready for the result file.
    Measured(MeasurementRecord),
    /// The tunnel never came up; nothing was measured.
    ConnectFailed,
    /// Connected, but the measurement failed.
    MeasureFailed,
}

impl CycleOutcome {
    /// The row, when there is one.
    pub fn record(&self) -> Option<&MeasurementRecord> {
        match self {
            Self::Measured(record) => Some(record),
            _ => None,
        }
    }
}

struct PhaseTracker<'a> {
    iso_code: &'a str,
    phase: CyclePhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(iso_code: &'a str) -> Self {
        Self {
            iso_code,
            phase: CyclePhase::Idle,
        }
    }

    fn advance(&mut self, next: CyclePhase) {
        debug!(iso = self.iso_code, from = %self.phase, to = %next, "cycle phase");
        self.phase = next;
    }
}

/// Run one location through the VPN.
///
/// Never fails: connect and measurement errors are logged and reported in the
/// outcome. Once connected, disconnect always runs and the network path is
/// direct again on return.
pub async fn run_cycle<V, M>(
    vpn: &V,
    meter: &M,
    network: &mut NetworkPath,
    endpoint: &SocksEndpoint,
    location: &Location,
) -> CycleOutcome
where
    V: VpnControl + ?Sized,
    M: SpeedMeter + ?Sized,
{
    let iso = location.iso_code.as_str();
    let mut phases = PhaseTracker::new(iso);

    phases.advance(CyclePhase::Connecting);
    info!(
        iso,
        country = %location.country,
        city = %location.city,
        "connecting"
    );
    if let Err(err) = vpn.connect(iso).await {
        error!(iso, error = %error_chain(&err), "connect failed, skipping location");
        phases.advance(CyclePhase::Done);
        return CycleOutcome::ConnectFailed;
    }
    phases.advance(CyclePhase::Connected);

    phases.advance(CyclePhase::Measuring);
    let measured = {
        let transport = network.proxied(endpoint);
        meter.measure(&transport).await
    };

    let outcome = match measured {
        Ok(results) => {
            phases.advance(CyclePhase::Measured);
            info!(
                iso,
                download_mbps = %format!("{:.2}", results.download_mbps()),
                upload_mbps = %format!("{:.2}", results.upload_mbps()),
                "location measured"
            );
            CycleOutcome::Measured(MeasurementRecord::from_parts(
                location,
                results.to_fields(),
            ))
        }
        Err(err) => {
            phases.advance(CyclePhase::MeasureFailed);
            error!(iso, error = %error_chain(&err), "speed test failed");
            CycleOutcome::MeasureFailed
        }
    };

    phases.advance(CyclePhase::Disconnecting);
    if let Err(err) = vpn.disconnect().await {
        warn!(iso, error = %error_chain(&err), "disconnect failed");
    }
    phases.advance(CyclePhase::Done);
    outcome
}
