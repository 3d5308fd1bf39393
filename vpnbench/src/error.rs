//! Run-level error taxonomy.

use std::path::PathBuf;

use thiserror::Error;

use crate::{store::StoreError, vpn::VpnError};

/// Why the process may not take custody of another user's configuration.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// Effective uid is not 0.
    #[error("vpnbench must run with root privileges")]
    NotRoot,
    /// No non-root `SUDO_USER` to borrow the configuration from.
    #[error("cannot determine the invoking user (SUDO_USER is unset or root)")]
    UnknownPrincipal,
    /// The passwd lookup failed.
    #[error("failed to look up user '{name}'")]
    UserLookup {
        /// User name looked up.
        name: String,
        /// Lookup failure.
        #[source]
        source: nix::Error,
    },
}

/// Errors that end a run.
///
/// Per-location failures (connect, measurement) never surface here; they are
/// logged by the measurement cycle and the run moves on.
#[derive(Debug, Error)]
pub enum BenchError {
    /// See [`PrivilegeError`].
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    /// The invoking user never logged in to the VPN.
    #[error("VPN configuration not found at {}", path.display())]
    ConfigNotFound {
        /// Expected location of the invoking user's configuration.
        path: PathBuf,
    },

    /// The catalog could not be obtained, or was empty.
    #[error("location discovery failed: {reason}")]
    Discovery {
        /// Short description for the operator.
        reason: String,
        /// Underlying CLI failure, if any.
        #[source]
        source: Option<VpnError>,
    },

    /// Displacing or installing the configuration failed.
    #[error("failed to take custody of {}", path.display())]
    Custody {
        /// Path being copied or renamed.
        path: PathBuf,
        /// Filesystem failure.
        #[source]
        source: std::io::Error,
    },

    /// A VPN CLI call outside the per-location cycle failed.
    #[error(transparent)]
    Vpn(#[from] VpnError),

    /// The result file could not be written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BenchError {
    /// Failures detected before the measurement loop could start.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Privilege(_) | Self::ConfigNotFound { .. } | Self::Discovery { .. }
        )
    }

    pub(crate) fn discovery(
        reason: impl Into<String>,
        source: Option<VpnError>,
    ) -> Self {
        Self::Discovery {
            reason: reason.into(),
            source,
        }
    }
}

/// Alias for `Result<T, BenchError>`.
pub type BenchResult<T> = Result<T, BenchError>;

/// `err` followed by each of its sources, joined with `: `.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_includes_sources() {
        let err = BenchError::Custody {
            path: PathBuf::from("/root/.local/share/adguardvpn-cli"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(
            error_chain(&err),
            "failed to take custody of /root/.local/share/adguardvpn-cli: disk full"
        );
    }

    #[test]
    fn preconditions_are_classified() {
        assert!(BenchError::from(PrivilegeError::NotRoot).is_precondition());
        assert!(BenchError::discovery("empty", None).is_precondition());
        let custody = BenchError::Custody {
            path: PathBuf::new(),
            source: std::io::Error::other("x"),
        };
        assert!(!custody.is_precondition());
    }
}
