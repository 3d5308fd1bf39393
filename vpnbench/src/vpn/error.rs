use std::{path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

/// Failures invoking the external VPN CLI.
#[derive(Debug, Error)]
pub enum VpnError {
    /// The binary does not exist.
    #[error("VPN CLI not found at {}", program.display())]
    NotFound {
        /// Path that was executed.
        program: PathBuf,
    },

    /// The process could not be started.
    #[error("failed to run `{command}`")]
    Spawn {
        /// Shell rendering of the command.
        command: String,
        /// Spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully.
    #[error("`{command}` failed with {status}: {detail}")]
    Failed {
        /// Shell rendering of the command.
        command: String,
        /// Exit status.
        status: ExitStatus,
        /// Trimmed stderr, or stdout when stderr is empty.
        detail: String,
    },

    /// The process outlived its timeout and was killed.
    #[error("`{command}` timed out after {}", humantime::format_duration(*after))]
    TimedOut {
        /// Shell rendering of the command.
        command: String,
        /// The timeout that expired.
        after: Duration,
    },
}

impl VpnError {
    /// The binary itself is missing, which no later call can fix.
    pub fn is_missing_binary(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
