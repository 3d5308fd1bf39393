//! Subprocess plumbing for the VPN CLI.

use std::{
    fmt::Display,
    io::ErrorKind,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{process::Command, time::timeout};
use tracing::debug;

use super::VpnError;

/// Abstract command representation so we can test without spawning processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Kill the process after this long.
    pub timeout: Option<Duration>,
}

/// Display raw command string
impl Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl CommandSpec {
    pub(crate) fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }
}

/// Captured result of one invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Best single-line explanation of a failure for error messages.
    pub fn detail(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Tokio command for `spec`: null stdin, piped output, killed on drop.
pub fn to_command(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // An interrupted run must not leave a half-finished connect behind.
        .kill_on_drop(true);
    cmd
}

/// Run `spec` to completion and capture its output.
///
/// Non-zero exit is not an error at this level; callers decide.
pub async fn run_spec_with_output(
    spec: &CommandSpec,
) -> Result<CommandOutput, VpnError> {
    let pending = to_command(spec).output();
    let result = match spec.timeout {
        Some(limit) => {
            timeout(limit, pending)
                .await
                .map_err(|_| VpnError::TimedOut {
                    command: spec.to_string(),
                    after: limit,
                })?
        }
        None => pending.await,
    };

    let output = result.map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            VpnError::NotFound {
                program: spec.program.clone(),
            }
        } else {
            VpnError::Spawn {
                command: spec.to_string(),
                source,
            }
        }
    })?;

    let output = CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    if !output.stderr.trim().is_empty() {
        debug!(command = %spec, stderr = %output.stderr.trim(), "command stderr");
    }
    debug!(command = %spec, stdout = %output.stdout.trim(), "command stdout");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("/opt/vpn/cli").args(["connect", "-l", "US"]);
        assert_eq!(spec.to_string(), "/opt/vpn/cli connect -l US");
        assert_eq!(spec.timeout, None);
    }

    #[tokio::test]
    async fn missing_program_is_reported_as_not_found() {
        let spec = CommandSpec::new("/nonexistent/vpnbench-test-binary")
            .args(["list-locations"]);
        let err = run_spec_with_output(&spec).await.unwrap_err();
        assert!(err.is_missing_binary(), "unexpected error: {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_status() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hello; exit 3"]);
        let out = run_spec_with_output(&spec).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.detail(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_is_enforced() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "sleep 5"])
            .with_timeout(Some(Duration::from_millis(50)));
        let err = run_spec_with_output(&spec).await.unwrap_err();
        assert!(matches!(err, VpnError::TimedOut { .. }));
    }
}
