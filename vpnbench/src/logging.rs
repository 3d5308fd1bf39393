//! Tracing setup for the `vpnbench` binary.

use std::{fs::File, io, path::Path, sync::Arc};

use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Install the global subscriber: stdout, plus an ANSI-free copy in
/// `log_file` when given. `RUST_LOG` overrides the default `info` filter.
pub fn init(log_file: Option<&Path>) -> io::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)
}
