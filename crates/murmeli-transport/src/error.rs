use std::net::SocketAddr;

use crate::PeerId;

/// Errors returned by the Murmeli transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {peer} failed: {source}")]
    Connect {
        peer: PeerId,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {peer} timed out")]
    ConnectTimeout { peer: PeerId },

    #[error("send to {peer} failed: {source}")]
    Send {
        peer: PeerId,
        #[source]
        source: std::io::Error,
    },

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("socks proxy refused {peer}: {reason}")]
    Socks { peer: PeerId, reason: String },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("no route to {0}: no socks proxy and no static address")]
    NoRoute(PeerId),

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("listener is shut down")]
    Shutdown,
}
