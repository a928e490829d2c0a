//! Node runtime: wires the protocol components together and runs the
//! inbound loop next to the delivery worker.

use std::sync::Arc;

use murmeli_transport::PeerId;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::contacts::TrustManager;
use crate::context::NodeContext;
use crate::delivery::{DeliveryEngine, DeliveryWorker};
use crate::dispatcher::{Disposition, Dispatcher};
use crate::gateway::KeyringDecrypter;
use crate::keyring::Keyring;
use crate::message::{field, Message};
use crate::profile::ContactStatus;
use crate::store::Store;
use crate::transport::Transport;
use crate::{codec, ProtocolConfig, ProtocolError};

/// Statuses that hear about us coming online or going away.
const PRESENCE_AUDIENCE: &[ContactStatus] = &[
    ContactStatus::Trusted,
    ContactStatus::Robot,
    ContactStatus::Owner,
];

/// One node's protocol components, sharing a single [`NodeContext`].
pub struct Node {
    ctx: NodeContext,
    engine: Arc<DeliveryEngine>,
    trust: Arc<TrustManager>,
    dispatcher: Dispatcher,
}

impl Node {
    pub fn new(
        store: Arc<dyn Store>,
        keyring: Arc<dyn Keyring>,
        config: ProtocolConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let ctx = NodeContext::new(store, keyring, config);
        let engine = Arc::new(DeliveryEngine::new(ctx.clone(), transport));
        let trust = Arc::new(TrustManager::new(engine.clone()));
        let dispatcher = Dispatcher::new(engine.clone(), trust.clone());
        Self {
            ctx,
            engine,
            trust,
            dispatcher,
        }
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    pub fn trust(&self) -> &TrustManager {
        &self.trust
    }

    /// Decode and route one received frame.
    ///
    /// Frames that fail to decode and messages that fail to dispatch are
    /// dropped; `None` is returned for both.
    pub fn handle_frame(&self, frame: &[u8]) -> Option<Disposition> {
        let msg = match codec::decode(frame, &KeyringDecrypter::new(self.ctx.keyring.as_ref())) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(len = frame.len(), "undecodable frame dropped: {e}");
                return None;
            }
        };
        let msg_type = msg.msg_type;
        match self.dispatcher.receive(msg) {
            Ok(disposition) => Some(disposition),
            Err(e) => {
                tracing::warn!(%msg_type, "dispatch failed: {e}");
                None
            }
        }
    }

    /// Queue a regular message to one or more contacts.
    ///
    /// With several recipients the full list travels with the message so
    /// everyone can reply to all.
    pub fn send_message(
        &self,
        to: &[PeerId],
        body: &str,
        parent_hash: Option<&str>,
    ) -> Result<Vec<u64>, ProtocolError> {
        let mut msg = Message::regular(body);
        for id in to {
            let status = self.ctx.store.get_profile(id)?.map(|p| p.status);
            if !status.is_some_and(ContactStatus::is_messageable) {
                return Err(ProtocolError::UnknownContact(id.to_string()));
            }
            msg = msg.to(id.clone());
        }
        if to.len() > 1 {
            let list: Vec<&str> = to.iter().map(PeerId::as_str).collect();
            msg.set_field(field::RECIPIENTS, list.join(","));
        }
        if let Some(parent) = parent_hash {
            msg.set_field(field::PARENT_HASH, parent);
        }
        self.engine.enqueue(msg)
    }

    fn announce_presence(&self, online: bool) -> Result<(), ProtocolError> {
        let mut msg = Message::status_notify(online, online);
        if online {
            msg.set_field(field::PROFILE_HASH, self.trust.public_profile()?.hash());
        }
        self.engine.broadcast(msg, PRESENCE_AUDIENCE)?;
        Ok(())
    }

    /// Start the delivery worker and the inbound loop over `inbound`.
    ///
    /// Trusted contacts are pinged straight away.
    pub fn start(self: Arc<Self>, mut inbound: mpsc::Receiver<Vec<u8>>) -> RuntimeHandle {
        let worker = self.engine.spawn_worker();
        if let Err(e) = self.announce_presence(true) {
            tracing::warn!("online announcement failed: {e}");
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let node = Arc::clone(&self);
        let inbound_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = inbound.recv() => match frame {
                        Some(frame) => {
                            node.handle_frame(&frame);
                        }
                        None => break,
                    },
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::debug!("inbound loop stopped");
        });
        tracing::info!(kind = ?self.ctx.config.dispatcher, "node started");

        RuntimeHandle {
            node: self,
            worker,
            stop_tx,
            inbound_task,
        }
    }
}

/// A running node.
pub struct RuntimeHandle {
    node: Arc<Node>,
    worker: DeliveryWorker,
    stop_tx: watch::Sender<bool>,
    inbound_task: JoinHandle<()>,
}

impl RuntimeHandle {
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Tell contacts we are going away, push out what we can and stop.
    pub async fn shutdown(self) {
        if let Err(e) = self.node.announce_presence(false) {
            tracing::warn!("offline announcement failed: {e}");
        }
        let _ = self.stop_tx.send(true);
        let _ = self.inbound_task.await;
        self.worker.stop().await;
        self.node.engine.flush().await;
        tracing::info!("node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::IdentityGateway;
    use crate::keyring::LocalKeyring;
    use crate::message::MessageType;
    use crate::profile::ContactProfile;
    use crate::store::MemoryStore;
    use crate::transport::mock::MockTransport;
    use std::time::Duration;

    fn peer(s: &str) -> PeerId {
        s.parse().unwrap()
    }

    fn node_with(transport: MockTransport) -> (Arc<Node>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let keyring = Arc::new(LocalKeyring::from_seed([1; 32]));
        let mut own = ContactProfile::new(peer("memememememememe"), ContactStatus::Myself, "Me");
        own.key_id = Some(keyring.own_key_id());
        store.add_or_update_profile(own).unwrap();

        let mut bob = ContactProfile::new(peer("bobbobbobbobbobb"), ContactStatus::Trusted, "Bob");
        bob.key_id = keyring.import_public_key(&LocalKeyring::from_seed([2; 32]).export_public_key());
        store.add_or_update_profile(bob).unwrap();

        let config = ProtocolConfig::default().send_delay(Duration::ZERO);
        let node = Node::new(store.clone(), keyring, config, Arc::new(transport));
        (Arc::new(node), store)
    }

    #[test]
    fn garbage_frames_dropped() {
        let (node, store) = node_with(MockTransport::new());
        assert_eq!(node.handle_frame(b"not a frame"), None);
        assert_eq!(node.handle_frame(&[]), None);
        assert!(store.get_inbox().unwrap().is_empty());
    }

    #[test]
    fn nested_relay_frames_dropped() {
        let (node, store) = node_with(MockTransport::new());
        let stranger = LocalKeyring::from_seed([9; 32]);
        let mut frame =
            codec::encode(&Message::regular("deep").with_timestamp(0), &IdentityGateway).unwrap();
        for _ in 0..500 {
            let parcel = stranger.sign_data(&frame).unwrap();
            frame = codec::encode(&Message::relay(parcel), &IdentityGateway).unwrap();
        }
        assert_eq!(node.handle_frame(&frame), None);
        assert!(store.get_inbox().unwrap().is_empty());
    }

    #[test]
    fn send_message_to_strangers_refused() {
        let (node, store) = node_with(MockTransport::new());
        let err = node
            .send_message(&[peer("nobodynobodynobo")], "hi", None)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownContact(_)));
        assert!(store.get_outbox().unwrap().is_empty());

        node.send_message(&[peer("bobbobbobbobbobb")], "hi", None).unwrap();
        assert_eq!(store.get_outbox().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_pings_and_shutdown_says_goodbye() {
        let transport = MockTransport::new();
        let (node, _store) = node_with(transport.clone());
        let (_tx, rx) = mpsc::channel(8);
        let handle = node.start(rx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        handle.shutdown().await;

        let sent = transport.sent_to(&peer("bobbobbobbobbobb"));
        assert_eq!(sent.len(), 2);
        let keyring = LocalKeyring::from_seed([2; 32]);
        keyring.import_public_key(&LocalKeyring::from_seed([1; 32]).export_public_key());
        let decrypter = KeyringDecrypter::new(&keyring);
        let first = codec::decode(&sent[0], &decrypter).unwrap();
        let last = codec::decode(&sent[1], &decrypter).unwrap();
        assert_eq!(first.msg_type, MessageType::StatusNotify);
        assert_eq!(first.field_bool(field::PING), Some(true));
        assert_eq!(last.field_bool(field::ONLINE), Some(false));
    }
}
