//! The network path measurements take.
//!
//! Instead of patching a process-wide socket factory, the active route is a
//! [`Transport`] value held by a [`NetworkPath`]. Routing through the VPN is
//! scoped by a [`ProxyGuard`], which puts the previous transport back when it
//! goes out of scope, whichever way the scope is left.

use std::ops::Deref;

use tracing::debug;
use vpnbench_speedtest::Transport;

/// Host and port of the VPN client's local SOCKS5 listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksEndpoint {
    /// Listener host.
    pub host: String,
    /// Listener port.
    pub port: u16,
}

impl SocksEndpoint {
    /// The client listens on loopback.
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    /// AdGuard VPN's default SOCKS port.
    pub const DEFAULT_PORT: u16 = 1080;

    /// Endpoint at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// SOCKS5 transport through this endpoint.
    pub fn transport(&self) -> Transport {
        Transport::socks5(self.host.clone(), self.port)
    }
}

impl Default for SocksEndpoint {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HOST, Self::DEFAULT_PORT)
    }
}

/// Transport currently used for measurements; direct unless a
/// [`ProxyGuard`] is alive.
#[derive(Debug, Default)]
pub struct NetworkPath {
    current: Transport,
}

impl NetworkPath {
    /// Path with no proxy installed.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Active transport.
    pub fn current(&self) -> &Transport {
        &self.current
    }

    /// No proxy installed.
    pub fn is_direct(&self) -> bool {
        !self.current.is_proxied()
    }

    /// Route through `endpoint` until the returned guard is dropped.
    pub fn proxied(&mut self, endpoint: &SocksEndpoint) -> ProxyGuard<'_> {
        let previous = std::mem::replace(&mut self.current, endpoint.transport());
        debug!(proxy = %self.current, "proxy installed");
        ProxyGuard {
            path: self,
            previous: Some(previous),
        }
    }
}

/// Scoped proxy installation; derefs to the active [`Transport`].
#[derive(Debug)]
pub struct ProxyGuard<'a> {
    path: &'a mut NetworkPath,
    previous: Option<Transport>,
}

impl Deref for ProxyGuard<'_> {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        &self.path.current
    }
}

impl Drop for ProxyGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.path.current = previous;
            debug!(transport = %self.path.current, "proxy removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_direct_path() {
        let mut path = NetworkPath::direct();
        {
            let guard = path.proxied(&SocksEndpoint::default());
            assert_eq!(*guard, Transport::socks5("127.0.0.1", 1080));
        }
        assert!(path.is_direct());
    }

    #[test]
    fn guard_restores_on_unwind() {
        let mut path = NetworkPath::direct();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = path.proxied(&SocksEndpoint::new("10.0.0.1", 9050));
            panic!("measurement blew up");
        }));
        assert!(result.is_err());
        assert!(path.is_direct());
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let mut path = NetworkPath::direct();
        let mut outer = path.proxied(&SocksEndpoint::new("a", 1));
        {
            let inner = outer.path.proxied(&SocksEndpoint::new("b", 2));
            assert_eq!(*inner, Transport::socks5("b", 2));
        }
        assert_eq!(*outer, Transport::socks5("a", 1));
        drop(outer);
        assert!(path.is_direct());
    }
}
