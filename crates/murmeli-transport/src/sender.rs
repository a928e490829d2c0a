use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::config::TransportConfig;
use crate::protocol::write_frame;
use crate::{socks, PeerId, TransportError};

/// Outgoing side of the transport: one connection per frame.
///
/// Cheap to clone; the configuration is shared.
#[derive(Debug, Clone)]
pub struct OnionSender {
    config: Arc<TransportConfig>,
}

impl OnionSender {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Connect to `peer`, write `frame`, close.
    ///
    /// Static addresses win over the proxy. Success only means the bytes
    /// left this node; there is no acknowledgement from the peer.
    pub async fn send(&self, peer: &PeerId, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > self.config.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: self.config.max_frame_size,
            });
        }

        let mut stream = self.open(peer).await?;
        write_frame(&mut stream, frame)
            .await
            .map_err(|source| TransportError::Send {
                peer: peer.clone(),
                source,
            })?;
        tracing::debug!(peer = %peer, bytes = frame.len(), "frame sent");
        Ok(())
    }

    async fn open(&self, peer: &PeerId) -> Result<TcpStream, TransportError> {
        if let Some(addr) = self.config.static_peers.get(peer) {
            return self.connect_tcp(peer, *addr).await;
        }

        let Some(proxy) = self.config.socks_proxy else {
            return Err(TransportError::NoRoute(peer.clone()));
        };
        let mut stream = self.connect_tcp(peer, proxy).await?;
        let host = peer.onion_host();
        let handshake = socks::connect(&mut stream, peer, &host, self.config.onion_port);
        tokio::time::timeout(self.config.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::ConnectTimeout { peer: peer.clone() })??;
        Ok(stream)
    }

    async fn connect_tcp(&self, peer: &PeerId, addr: SocketAddr) -> Result<TcpStream, TransportError> {
        tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout { peer: peer.clone() })?
            .map_err(|source| TransportError::Connect {
                peer: peer.clone(),
                source,
            })
    }
}
