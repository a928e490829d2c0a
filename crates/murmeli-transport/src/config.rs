use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::PeerId;

/// Environment variable overriding the SOCKS proxy address.
pub const SOCKS_PROXY_ENV: &str = "MURMELI_SOCKS_PROXY";

/// Configuration for [`FrameListener`](crate::FrameListener) and
/// [`OnionSender`](crate::OnionSender).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use murmeli_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .listen_addr("127.0.0.1:11009".parse().unwrap())
///     .max_frame_size(512 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local address the hidden service forwards to.
    pub(crate) listen_addr: SocketAddr,
    /// Port remote hidden services listen on.
    pub(crate) onion_port: u16,
    /// SOCKS5 proxy used to reach `.onion` hosts.
    pub(crate) socks_proxy: Option<SocketAddr>,
    /// Maximum accepted frame size in bytes.
    pub(crate) max_frame_size: usize,
    /// Channel buffer size for received frames.
    pub(crate) recv_buffer: usize,
    /// Timeout for establishing an outgoing connection.
    pub(crate) connect_timeout: Duration,
    /// Timeout for reading one inbound frame.
    pub(crate) read_timeout: Duration,
    /// Direct addresses that bypass the proxy (local networks, tests).
    pub(crate) static_peers: HashMap<PeerId, SocketAddr>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a new config with defaults.
    ///
    /// If `MURMELI_SOCKS_PROXY` is set it is used as the proxy. This can be
    /// overridden with [`.socks_proxy()`](Self::socks_proxy).
    pub fn new() -> Self {
        let socks_proxy = std::env::var(SOCKS_PROXY_ENV)
            .ok()
            .and_then(|s| s.parse().ok());

        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], crate::DEFAULT_ONION_PORT)),
            onion_port: crate::DEFAULT_ONION_PORT,
            socks_proxy,
            max_frame_size: 1024 * 1024,
            recv_buffer: 256,
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(30),
            static_peers: HashMap::new(),
        }
    }

    /// Set the local listen address.
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the port remote hidden services listen on (default: 11009).
    pub fn onion_port(mut self, port: u16) -> Self {
        self.onion_port = port;
        self
    }

    /// Route `.onion` connections through this SOCKS5 proxy.
    pub fn socks_proxy(mut self, addr: SocketAddr) -> Self {
        self.socks_proxy = Some(addr);
        self
    }

    /// Set the maximum frame size (default: 1 MiB).
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Set the channel buffer size for received frames (default: 256).
    pub fn recv_buffer(mut self, capacity: usize) -> Self {
        self.recv_buffer = capacity;
        self
    }

    /// Set the outgoing connect timeout (default: 60 s, onion circuits are slow).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the inbound read timeout (default: 30 s).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Reach `peer` directly at `addr` instead of through the proxy.
    pub fn static_peer(mut self, peer: PeerId, addr: SocketAddr) -> Self {
        self.static_peers.insert(peer, addr);
        self
    }

    pub fn get_listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn get_socks_proxy(&self) -> Option<SocketAddr> {
        self.socks_proxy
    }

    pub fn get_max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let peer: PeerId = "abcdefghijklmnop".parse().unwrap();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let config = TransportConfig::new()
            .onion_port(1234)
            .max_frame_size(10)
            .static_peer(peer.clone(), addr);

        assert_eq!(config.onion_port, 1234);
        assert_eq!(config.get_max_frame_size(), 10);
        assert_eq!(config.static_peers.get(&peer), Some(&addr));
    }
}
