//! Resumable per-location throughput benchmarks through the AdGuard VPN CLI.
//!
//! A run borrows the invoking user's VPN login ([`custody`]), asks the VPN
//! client for its locations ([`catalog`]) and then, one location at a time,
//! connects, measures through the client's local SOCKS proxy and disconnects
//! ([`cycle`]). Every successful measurement is appended to a CSV file
//! ([`store`]) that doubles as the resume state, so an interrupted run picks
//! up where it stopped. [`controller`] ties the pieces together.
//!
//! The external processes sit behind two traits, [`VpnControl`] and
//! [`SpeedMeter`], so the orchestration can be exercised without a VPN.

pub mod catalog;
pub mod config;
pub mod controller;
pub mod custody;
pub mod cycle;
pub mod error;
pub mod logging;
pub mod meter;
pub mod record;
pub mod store;
pub mod transport;
pub mod vpn;

pub use catalog::{Location, fetch_locations, parse_locations};
pub use config::{BenchConfig, CliOverrides, ConfigError, ConfigLoader};
pub use controller::{
    RunController, RunOutcome, RunReport, RunSettings, list_in_custody,
    shutdown_signal,
};
pub use custody::{ConfigCustodian, CustodyPaths, CustodyState, Principal};
pub use cycle::{CycleOutcome, CyclePhase, run_cycle};
pub use error::{BenchError, BenchResult, PrivilegeError};
pub use meter::{SpeedMeter, SpeedtestMeter};
pub use record::MeasurementRecord;
pub use store::{ActiveFilePolicy, LatestModified, ResultStore, StoreError};
pub use transport::{NetworkPath, ProxyGuard, SocksEndpoint};
pub use vpn::{VpnCli, VpnControl, VpnError};
pub use vpnbench_speedtest::Transport;
