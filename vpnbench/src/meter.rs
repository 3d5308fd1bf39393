//! The speed measurement seam.

use async_trait::async_trait;
use tracing::info;
use vpnbench_speedtest::{
    Speedtest, SpeedtestError, SpeedtestOptions, SpeedtestResults, Transport,
};

/// Runs one full measurement over the given transport.
#[async_trait]
pub trait SpeedMeter: Send + Sync {
    /// Best server, download and upload, all through `transport`.
    async fn measure(
        &self,
        transport: &Transport,
    ) -> Result<SpeedtestResults, SpeedtestError>;
}

/// [`SpeedMeter`] backed by the speedtest.net client: best server, then
/// download, then upload.
#[derive(Debug, Clone, Default)]
pub struct SpeedtestMeter {
    options: SpeedtestOptions,
}

impl SpeedtestMeter {
    /// Meter running sessions with `options`.
    pub fn new(options: SpeedtestOptions) -> Self {
        Self { options }
    }

    /// Session options.
    pub fn options(&self) -> &SpeedtestOptions {
        &self.options
    }
}

#[async_trait]
impl SpeedMeter for SpeedtestMeter {
    async fn measure(
        &self,
        transport: &Transport,
    ) -> Result<SpeedtestResults, SpeedtestError> {
        let mut session = Speedtest::new(transport, self.options.clone())?;

        info!("finding best server");
        let server = session.get_best_server().await?;
        info!(server = %server.label(), host = %server.host, "selected server");

        info!("testing download speed");
        let download = session.download().await?;
        info!("testing upload speed");
        let upload = session.upload().await?;

        let results = session.into_results();
        info!(
            download_mbps = %format!("{:.2}", download / 1_000_000.0),
            upload_mbps = %format!("{:.2}", upload / 1_000_000.0),
            ping_ms = %format!("{:.1}", results.ping),
            "measurement complete"
        );
        Ok(results)
    }
}
