use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::protocol::read_frame;
use crate::TransportError;

/// Always-on listener: accepts one short-lived connection per inbound frame.
pub struct FrameListener {
    local_addr: SocketAddr,
    incoming_rx: mpsc::Receiver<Vec<u8>>,
    handle: ListenerHandle,
}

/// Controls the accept loop once the frame receiver has been handed off.
pub struct ListenerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct ConnectionLimits {
    max_frame_size: usize,
    read_timeout: Duration,
}

impl FrameListener {
    /// Bind the listen address and start accepting connections.
    pub async fn bind(config: &TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.listen_addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: config.listen_addr,
                source,
            })?;

        let (incoming_tx, incoming_rx) = mpsc::channel(config.recv_buffer);
        let (stop_tx, stop_rx) = watch::channel(false);
        let limits = Arc::new(ConnectionLimits {
            max_frame_size: config.max_frame_size,
            read_timeout: config.read_timeout,
        });

        let task = tokio::spawn(accept_loop(listener, incoming_tx, stop_rx, limits));
        tracing::info!(%local_addr, "listening for frames");

        Ok(Self {
            local_addr,
            incoming_rx,
            handle: ListenerHandle { stop_tx, task },
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive the next inbound frame. Blocks until one arrives.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.incoming_rx.recv().await.ok_or(TransportError::Shutdown)
    }

    /// Split into the control handle and the frame receiver.
    pub fn into_parts(self) -> (ListenerHandle, mpsc::Receiver<Vec<u8>>) {
        (self.handle, self.incoming_rx)
    }

    /// Stop accepting connections.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}

impl ListenerHandle {
    /// Stop the accept loop and wait for it to exit.
    ///
    /// Connections already accepted finish reading on their own tasks.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    incoming_tx: mpsc::Sender<Vec<u8>>,
    mut stop_rx: watch::Receiver<bool>,
    limits: Arc<ConnectionLimits>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            remote,
                            incoming_tx.clone(),
                            limits.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                    }
                }
            }
            _ = stop_rx.changed() => {
                tracing::debug!("listener stopping");
                break;
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    incoming_tx: mpsc::Sender<Vec<u8>>,
    limits: Arc<ConnectionLimits>,
) {
    match read_frame(&mut stream, limits.max_frame_size, limits.read_timeout).await {
        Ok(frame) if frame.is_empty() => {
            tracing::debug!(%remote, "empty connection ignored");
        }
        Ok(frame) => {
            let _ = incoming_tx.send(frame).await;
        }
        Err(e) => {
            tracing::warn!(%remote, "failed to read frame: {e}");
        }
    }
}
