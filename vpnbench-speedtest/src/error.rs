//! Error types for the speedtest client.

use thiserror::Error;

/// Errors raised while discovering servers or measuring throughput.
#[derive(Debug, Error)]
pub enum SpeedtestError {
    /// The reqwest client could not be built.
    #[error("failed to build HTTP client")]
    Client {
        /// Builder failure.
        #[source]
        source: reqwest::Error,
    },

    /// An HTTP request failed or returned an error status.
    #[error("request to {url} failed")]
    Request {
        /// Requested URL.
        url: String,
        /// Transport or status error.
        #[source]
        source: reqwest::Error,
    },

    /// The SOCKS endpoint does not form a valid proxy URL.
    #[error("invalid proxy endpoint {endpoint}")]
    Proxy {
        /// The rejected `socks5h://` URL.
        endpoint: String,
        /// Why reqwest rejected it.
        #[source]
        source: reqwest::Error,
    },

    /// A server-list entry carries an unparsable URL.
    #[error("invalid server URL '{url}'")]
    InvalidServerUrl {
        /// The URL as listed.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },

    /// The server list came back empty.
    #[error("server list is empty")]
    NoServers,

    /// Every candidate server failed the latency check.
    #[error("no server answered the latency probe")]
    NoReachableServer,

    /// A transfer was started before a server was selected.
    #[error("{0} requires a selected server; call get_best_server first")]
    NoBestServer(&'static str),
}

/// Alias for `Result<T, SpeedtestError>`.
pub type SpeedtestResult<T> = Result<T, SpeedtestError>;
