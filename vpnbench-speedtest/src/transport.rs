//! Network transport used for every speedtest request.

use std::{fmt, time::Duration};

use reqwest::{Client, Proxy};

use crate::{SpeedtestError, SpeedtestResult};

const USER_AGENT: &str =
    concat!("vpnbench-speedtest/", env!("CARGO_PKG_VERSION"));

/// How speedtest traffic leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Transport {
    /// Plain sockets, no proxy.
    #[default]
    Direct,
    /// SOCKS5 proxy; host names are resolved by the proxy (`socks5h`).
    Socks5 {
        /// Proxy host.
        host: String,
        /// Proxy port.
        port: u16,
    },
}

impl Transport {
    /// SOCKS5 transport through `host:port`.
    pub fn socks5(host: impl Into<String>, port: u16) -> Self {
        Self::Socks5 {
            host: host.into(),
            port,
        }
    }

    /// Whether traffic goes through a proxy.
    pub fn is_proxied(&self) -> bool {
        matches!(self, Self::Socks5 { .. })
    }

    /// Proxy URL handed to reqwest, if any.
    pub fn proxy_url(&self) -> Option<String> {
        match self {
            Self::Direct => None,
            Self::Socks5 { host, port } => {
                Some(format!("socks5h://{host}:{port}"))
            }
        }
    }

    /// Build an HTTP client bound to this transport.
    pub fn build_client(&self, timeout: Duration) -> SpeedtestResult<Client> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout);

        builder = match self.proxy_url() {
            Some(endpoint) => {
                let proxy = Proxy::all(&endpoint).map_err(|source| {
                    SpeedtestError::Proxy {
                        endpoint: endpoint.clone(),
                        source,
                    }
                })?;
                builder.proxy(proxy)
            }
            // Ignore HTTP(S)_PROXY from the environment so "direct" means direct.
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|source| SpeedtestError::Client { source })
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Socks5 { host, port } => write!(f, "socks5h://{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_has_no_proxy_url() {
        assert_eq!(Transport::Direct.proxy_url(), None);
        assert!(!Transport::default().is_proxied());
    }

    #[test]
    fn socks_resolves_remotely() {
        let t = Transport::socks5("127.0.0.1", 1080);
        assert_eq!(t.proxy_url().as_deref(), Some("socks5h://127.0.0.1:1080"));
        assert_eq!(t.to_string(), "socks5h://127.0.0.1:1080");
        assert!(t.is_proxied());
    }

    #[test]
    fn clients_build_for_both_variants() {
        let timeout = Duration::from_secs(5);
        assert!(Transport::Direct.build_client(timeout).is_ok());
        assert!(Transport::socks5("127.0.0.1", 1080)
            .build_client(timeout)
            .is_ok());
    }
}
