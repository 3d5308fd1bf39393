//! Minimal speedtest.net client.
//!
//! The client speaks the public speedtest.net HTTP protocol: it fetches the
//! nearest servers, picks the one with the lowest measured latency, then
//! measures download and upload throughput against it. Every request goes
//! through the [`Transport`] the client was built with, so callers decide
//! whether traffic leaves directly or through a SOCKS proxy without touching
//! any process-wide state.
//!
//! ```rust,ignore
//! use vpnbench_speedtest::{Speedtest, SpeedtestOptions, Transport};
//!
//! let transport = Transport::socks5("127.0.0.1", 1080);
//! let mut st = Speedtest::new(&transport, SpeedtestOptions::default())?;
//! st.get_servers().await?;
//! st.get_best_server().await?;
//! st.download().await?;
//! st.upload().await?;
//! println!("{:?}", st.results());
//! ```

pub mod client;
pub mod error;
pub mod results;
pub mod server;
pub mod transport;

pub use client::{Speedtest, SpeedtestOptions};
pub use error::{SpeedtestError, SpeedtestResult};
pub use results::SpeedtestResults;
pub use server::Server;
pub use transport::Transport;
