use murmeli_transport::{OnionSender, PeerId, TransportError};

/// Network seam for the delivery engine.
///
/// In production: [`OnionSender`]. In tests: [`mock::MockTransport`] or
/// any in-process loopback.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one frame to `target`. `Ok` means the bytes left this node.
    async fn send_frame(&self, target: &PeerId, frame: &[u8]) -> Result<(), TransportError>;
}

// ── Impl for OnionSender (production) ────────────────────────────────

#[async_trait::async_trait]
impl Transport for OnionSender {
    async fn send_frame(&self, target: &PeerId, frame: &[u8]) -> Result<(), TransportError> {
        OnionSender::send(self, target, frame).await
    }
}

// ── MockTransport (tests) ────────────────────────────────────────────

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Records every send; peers can be marked unreachable.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        sent: Arc<Mutex<Vec<(PeerId, Vec<u8>)>>>,
        unreachable: Arc<Mutex<HashSet<PeerId>>>,
        fail_sends: Arc<Mutex<bool>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<(PeerId, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_to(&self, peer: &PeerId) -> Vec<Vec<u8>> {
            self.sent()
                .into_iter()
                .filter(|(to, _)| to == peer)
                .map(|(_, frame)| frame)
                .collect()
        }

        pub fn set_unreachable(&self, peer: &PeerId, unreachable: bool) {
            let mut set = self.unreachable.lock().unwrap();
            if unreachable {
                set.insert(peer.clone());
            } else {
                set.remove(peer);
            }
        }

        pub fn set_fail_sends(&self, fail: bool) {
            *self.fail_sends.lock().unwrap() = fail;
        }

        pub fn clear_sent(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send_frame(&self, target: &PeerId, frame: &[u8]) -> Result<(), TransportError> {
            if *self.fail_sends.lock().unwrap() || self.unreachable.lock().unwrap().contains(target) {
                return Err(TransportError::ConnectTimeout {
                    peer: target.clone(),
                });
            }
            self.sent.lock().unwrap().push((target.clone(), frame.to_vec()));
            Ok(())
        }
    }
}
