//! The resumable benchmark run.
//!
//! A run takes custody of the VPN configuration, switches the client to SOCKS
//! mode, discovers the catalog, loads the resume set and then walks the
//! catalog one location at a time. Whether the walk completes, fails or is
//! interrupted, custody is released and the VPN disconnected before
//! [`RunController::run`] returns.

use std::{fmt, future::Future, path::PathBuf};

use tokio::signal::{
    self,
    unix::{SignalKind, signal as unix_signal},
};
use tracing::{error, info, warn};

use crate::{
    catalog::{Location, fetch_locations},
    custody::ConfigCustodian,
    cycle::{CycleOutcome, run_cycle},
    error::{BenchError, BenchResult, error_chain},
    meter::SpeedMeter,
    store::{ActiveFilePolicy, LatestModified, ResultStore},
    transport::{NetworkPath, SocksEndpoint},
    vpn::VpnControl,
};

/// Knobs of a run that are not owned by a collaborator.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// SOCKS listener measurements are routed through.
    pub endpoint: SocksEndpoint,
    /// Issue `config set-mode socks` before discovery.
    pub set_socks_mode: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            endpoint: SocksEndpoint::default(),
            set_socks_mode: true,
        }
    }
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every location was visited.
    Completed,
    /// The shutdown future resolved first.
    Interrupted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        })
    }
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Completed or interrupted.
    pub outcome: RunOutcome,
    /// Locations in the discovered catalog.
    pub total: usize,
    /// Already present in the result file.
    pub skipped: usize,
    /// Rows appended by this run.
    pub measured: usize,
    /// Connect or measurement failed; retried on the next run.
    pub failed: usize,
    /// Result file appended to.
    pub results_file: PathBuf,
}

#[derive(Debug, Default)]
struct Tally {
    total: usize,
    skipped: usize,
    measured: usize,
    failed: usize,
}

/// Owns everything one run touches and guarantees cleanup.
#[derive(Debug)]
pub struct RunController<V, M, P = LatestModified> {
    vpn: V,
    meter: M,
    custodian: ConfigCustodian,
    store: ResultStore<P>,
    network: NetworkPath,
    settings: RunSettings,
}

impl<V, M, P> RunController<V, M, P>
where
    V: VpnControl,
    M: SpeedMeter,
    P: ActiveFilePolicy,
{
    /// Controller starting on a direct network path.
    pub fn new(
        vpn: V,
        meter: M,
        custodian: ConfigCustodian,
        store: ResultStore<P>,
        settings: RunSettings,
    ) -> Self {
        Self {
            vpn,
            meter,
            custodian,
            store,
            network: NetworkPath::direct(),
            settings,
        }
    }

    /// Configuration custodian.
    pub fn custodian(&self) -> &ConfigCustodian {
        &self.custodian
    }

    /// Result store.
    pub fn store(&self) -> &ResultStore<P> {
        &self.store
    }

    /// Network path measurements use.
    pub fn network(&self) -> &NetworkPath {
        &self.network
    }

    /// Drive the run until it finishes or `shutdown` resolves.
    ///
    /// Interruption is a normal outcome. Errors are returned only after
    /// cleanup has run.
    pub async fn run<F>(&mut self, shutdown: F) -> BenchResult<RunReport>
    where
        F: Future<Output = ()>,
    {
        let mut tally = Tally::default();
        let result = tokio::select! {
            driven = self.drive(&mut tally) => driven.map(|()| RunOutcome::Completed),
            () = shutdown => {
                warn!("interrupted, stopping after cleanup");
                Ok(RunOutcome::Interrupted)
            }
        };

        if let Err(err) = &result {
            error!(error = %error_chain(err), "run aborted");
        }
        self.cleanup().await;

        let report = RunReport {
            outcome: result?,
            total: tally.total,
            skipped: tally.skipped,
            measured: tally.measured,
            failed: tally.failed,
            results_file: self.store.active_path().to_path_buf(),
        };
        info!(
            outcome = %report.outcome,
            total = report.total,
            skipped = report.skipped,
            measured = report.measured,
            failed = report.failed,
            results = %report.results_file.display(),
            "run finished"
        );
        Ok(report)
    }

    async fn drive(&mut self, tally: &mut Tally) -> BenchResult<()> {
        self.custodian.acquire()?;

        if self.settings.set_socks_mode {
            info!("switching VPN client to SOCKS mode");
            self.vpn.set_socks_mode().await.map_err(|err| {
                if err.is_missing_binary() {
                    BenchError::discovery("VPN CLI binary is missing", Some(err))
                } else {
                    err.into()
                }
            })?;
        }

        let locations = fetch_locations(&self.vpn).await?;
        let tested = self.store.load_resume_set();
        tally.total = locations.len();

        for (index, location) in locations.iter().enumerate() {
            let progress = format!("{}/{}", index + 1, tally.total);
            if tested.contains(&location.iso_code) {
                info!(
                    %progress,
                    iso = %location.iso_code,
                    city = %location.city,
                    "already tested, skipping"
                );
                tally.skipped += 1;
                continue;
            }

            info!(
                %progress,
                iso = %location.iso_code,
                city = %location.city,
                "testing location"
            );
            let outcome = run_cycle(
                &self.vpn,
                &self.meter,
                &mut self.network,
                &self.settings.endpoint,
                location,
            )
            .await;

            match outcome {
                CycleOutcome::Measured(record) => {
                    self.store.append(&record)?;
                    tally.measured += 1;
                    info!(
                        path = %self.store.active_path().display(),
                        "result saved"
                    );
                }
                CycleOutcome::ConnectFailed | CycleOutcome::MeasureFailed => {
                    tally.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn cleanup(&mut self) {
        info!("cleaning up");
        self.custodian.release();
        info!("making sure the VPN is disconnected");
        if let Err(err) = self.vpn.disconnect().await {
            warn!(error = %error_chain(&err), "final disconnect failed");
        }
    }
}

/// Fetch the catalog with the invoking user's configuration installed.
///
/// `Ok(None)` means `shutdown` resolved first. Custody is released before
/// this returns on every path.
pub async fn list_in_custody<V, F>(
    vpn: &V,
    custodian: &mut ConfigCustodian,
    shutdown: F,
) -> BenchResult<Option<Vec<Location>>>
where
    V: VpnControl,
    F: Future<Output = ()>,
{
    custodian.acquire()?;
    let fetched = tokio::select! {
        fetched = fetch_locations(vpn) => Some(fetched),
        () = shutdown => {
            warn!("interrupted while listing locations");
            None
        }
    };
    custodian.release();
    fetched.transpose()
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = interrupt => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}
