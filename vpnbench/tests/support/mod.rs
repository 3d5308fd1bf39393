//! In-memory stand-ins for the VPN CLI and the speed meter.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    fs,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::Notify;
use vpnbench::{SpeedMeter, Transport, VpnControl, VpnError};
use vpnbench_speedtest::{SpeedtestError, SpeedtestResults};

pub const LISTING: &str = "\
ISO  Country              City                Ping
US   United States        New York            12
DE   Germany              Frankfurt           34
FR   France               Paris               29
";

fn failed(command: &str) -> VpnError {
    VpnError::Failed {
        command: command.to_string(),
        status: ExitStatus::from_raw(1 << 8),
        detail: "simulated failure".to_string(),
    }
}

#[derive(Debug, Default)]
struct VpnState {
    listing: String,
    calls: Vec<String>,
    connected: Option<String>,
    failing_connects: HashSet<String>,
    failing_disconnect: bool,
    hang_listing: Option<Arc<Notify>>,
}

/// Records every call; `connect` fails for the ISO codes marked failing.
#[derive(Debug, Clone, Default)]
pub struct FakeVpn {
    state: Arc<Mutex<VpnState>>,
}

impl FakeVpn {
    pub fn with_listing(listing: &str) -> Self {
        let vpn = Self::default();
        vpn.state.lock().unwrap().listing = listing.to_string();
        vpn
    }

    pub fn fail_connect(&self, iso: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_connects
            .insert(iso.to_string());
    }

    pub fn fail_disconnect(&self) {
        self.state.lock().unwrap().failing_disconnect = true;
    }

    /// `list-locations` signals the returned handle and never completes.
    pub fn hang_listing(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.state.lock().unwrap().hang_listing = Some(Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn connected(&self) -> Option<String> {
        self.state.lock().unwrap().connected.clone()
    }
}

#[async_trait]
impl VpnControl for FakeVpn {
    async fn list_locations(&self) -> Result<String, VpnError> {
        let (listing, hang) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push("list-locations".into());
            (state.listing.clone(), state.hang_listing.clone())
        };
        if let Some(notify) = hang {
            notify.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(listing)
    }

    async fn connect(&self, iso_code: &str) -> Result<(), VpnError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("connect {iso_code}"));
        if state.failing_connects.contains(iso_code) {
            return Err(failed("connect"));
        }
        state.connected = Some(iso_code.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VpnError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("disconnect".into());
        state.connected = None;
        if state.failing_disconnect {
            return Err(failed("disconnect"));
        }
        Ok(())
    }

    async fn set_socks_mode(&self) -> Result<(), VpnError> {
        self.state.lock().unwrap().calls.push("set-mode socks".into());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MeterState {
    seen: Vec<(Option<String>, Transport)>,
    failing: HashSet<String>,
    hang_on_call: Option<usize>,
}

/// Reports a fixed result for whichever location the paired [`FakeVpn`] is
/// connected to.
#[derive(Debug, Clone)]
pub struct FakeMeter {
    vpn: FakeVpn,
    state: Arc<Mutex<MeterState>>,
    interrupt: Arc<Notify>,
}

impl FakeMeter {
    pub fn new(vpn: &FakeVpn) -> Self {
        Self {
            vpn: vpn.clone(),
            state: Arc::default(),
            interrupt: Arc::new(Notify::new()),
        }
    }

    pub fn fail_for(&self, iso: &str) {
        self.state.lock().unwrap().failing.insert(iso.to_string());
    }

    /// The `n`th measurement (1-based) signals [`interrupt`](Self::interrupt)
    /// and never completes.
    pub fn hang_on_call(&self, n: usize) {
        self.state.lock().unwrap().hang_on_call = Some(n);
    }

    pub fn interrupt(&self) -> Arc<Notify> {
        Arc::clone(&self.interrupt)
    }

    /// `(connected ISO, transport)` for every measurement attempt.
    pub fn seen(&self) -> Vec<(Option<String>, Transport)> {
        self.state.lock().unwrap().seen.clone()
    }

    pub fn measured_isos(&self) -> Vec<String> {
        self.seen().into_iter().filter_map(|(iso, _)| iso).collect()
    }
}

#[async_trait]
impl SpeedMeter for FakeMeter {
    async fn measure(
        &self,
        transport: &Transport,
    ) -> Result<SpeedtestResults, SpeedtestError> {
        let connected = self.vpn.connected();
        let (hang, fail) = {
            let mut state = self.state.lock().unwrap();
            state.seen.push((connected.clone(), transport.clone()));
            let hang = state.hang_on_call == Some(state.seen.len());
            let fail = connected
                .as_ref()
                .is_some_and(|iso| state.failing.contains(iso));
            (hang, fail)
        };

        if hang {
            self.interrupt.notify_one();
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(SpeedtestError::NoServers);
        }
        Ok(SpeedtestResults {
            download: 50_000_000.0,
            upload: 10_000_000.0,
            ping: 21.5,
            bytes_sent: 1_024,
            bytes_received: 4_096,
            ..SpeedtestResults::default()
        })
    }
}

/// A user configuration and a distinct root configuration under `root`.
pub fn custody_fixture(root: &Path) -> (PathBuf, PathBuf) {
    let source = root.join("home/alice/.local/share/adguardvpn-cli");
    let destination = root.join("root/.local/share/adguardvpn-cli");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("token"), "alice").unwrap();
    fs::create_dir_all(&destination).unwrap();
    fs::write(destination.join("token"), "root").unwrap();
    (source, destination)
}

/// Parsed rows of a CSV file, header included.
pub fn csv_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|row| row.unwrap().iter().map(str::to_string).collect())
        .collect()
}
