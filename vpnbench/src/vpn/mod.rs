//! The VPN control seam.
//!
//! [`VpnControl`] is what the run controller and the measurement cycle talk
//! to. [`VpnCli`] implements it by shelling out to the AdGuard VPN CLI; tests
//! substitute in-memory fakes.

mod error;
pub mod spec;

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use tracing::{error, info};

pub use error::VpnError;
use spec::{CommandOutput, CommandSpec, run_spec_with_output};

/// Operations the run needs from the external VPN process.
#[async_trait]
pub trait VpnControl: Send + Sync {
    /// Raw `list-locations` output.
    async fn list_locations(&self) -> Result<String, VpnError>;

    /// Bring the tunnel up for `iso_code`; the local SOCKS proxy is
    /// listening once this returns `Ok`.
    async fn connect(&self, iso_code: &str) -> Result<(), VpnError>;

    /// Tear the tunnel down. Safe to call when not connected.
    async fn disconnect(&self) -> Result<(), VpnError>;

    /// Switch the client to SOCKS proxy mode.
    async fn set_socks_mode(&self) -> Result<(), VpnError>;
}

/// [`VpnControl`] backed by the `adguardvpn-cli` binary.
#[derive(Debug, Clone)]
pub struct VpnCli {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl VpnCli {
    /// Bare program names are resolved through `PATH`; a name that cannot
    /// be resolved is kept as-is and fails at first use.
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        let program = program.into();
        let program = if program.components().count() == 1 {
            which::which(&program).unwrap_or(program)
        } else {
            program
        };
        Self { program, timeout }
    }

    /// Resolved executable.
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn spec<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(self.program.clone())
            .args(args)
            .with_timeout(self.timeout)
    }

    /// `list-locations`.
    pub fn list_locations_spec(&self) -> CommandSpec {
        self.spec(["list-locations"])
    }

    /// `connect -l <iso_code>`.
    pub fn connect_spec(&self, iso_code: &str) -> CommandSpec {
        self.spec(["connect", "-l", iso_code])
    }

    /// `disconnect`.
    pub fn disconnect_spec(&self) -> CommandSpec {
        self.spec(["disconnect"])
    }

    /// `config set-mode socks`.
    pub fn set_socks_mode_spec(&self) -> CommandSpec {
        self.spec(["config", "set-mode", "socks"])
    }

    async fn run_checked(
        &self,
        spec: &CommandSpec,
    ) -> Result<CommandOutput, VpnError> {
        info!(command = %spec, "running VPN command");
        let output = run_spec_with_output(spec).await?;
        if output.status.success() {
            return Ok(output);
        }
        error!(
            command = %spec,
            status = %output.status,
            stdout = %output.stdout.trim(),
            stderr = %output.stderr.trim(),
            "VPN command failed"
        );
        Err(VpnError::Failed {
            command: spec.to_string(),
            status: output.status,
            detail: output.detail(),
        })
    }
}

#[async_trait]
impl VpnControl for VpnCli {
    async fn list_locations(&self) -> Result<String, VpnError> {
        Ok(self.run_checked(&self.list_locations_spec()).await?.stdout)
    }

    async fn connect(&self, iso_code: &str) -> Result<(), VpnError> {
        self.run_checked(&self.connect_spec(iso_code)).await.map(drop)
    }

    async fn disconnect(&self) -> Result<(), VpnError> {
        self.run_checked(&self.disconnect_spec()).await.map(drop)
    }

    async fn set_socks_mode(&self) -> Result<(), VpnError> {
        self.run_checked(&self.set_socks_mode_spec()).await.map(drop)
    }
}
