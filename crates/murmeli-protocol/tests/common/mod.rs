//! In-process network of protocol nodes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use murmeli_protocol::{
    ContactProfile, ContactStatus, Disposition, Keyring, LocalKeyring, MemoryStore, Node,
    ProtocolConfig, Store, Transport,
};
use murmeli_transport::{PeerId, TransportError};

/// Frames in flight, keyed by recipient. Nothing is delivered until
/// [`Net::pump`].
#[derive(Default)]
struct Wire {
    mailboxes: HashMap<PeerId, VecDeque<Vec<u8>>>,
    offline: HashSet<PeerId>,
}

#[derive(Clone, Default)]
pub struct Loopback {
    wire: Arc<Mutex<Wire>>,
}

#[async_trait]
impl Transport for Loopback {
    async fn send_frame(&self, target: &PeerId, frame: &[u8]) -> Result<(), TransportError> {
        let mut wire = self.wire.lock().unwrap();
        if wire.offline.contains(target) {
            return Err(TransportError::ConnectTimeout {
                peer: target.clone(),
            });
        }
        wire.mailboxes
            .entry(target.clone())
            .or_default()
            .push_back(frame.to_vec());
        Ok(())
    }
}

pub struct TestNode {
    pub id: PeerId,
    pub node: Arc<Node>,
    pub store: Arc<MemoryStore>,
    pub keyring: Arc<LocalKeyring>,
}

impl TestNode {
    pub fn profile(&self, other: &TestNode) -> Option<ContactProfile> {
        self.store.get_profile(&other.id).unwrap()
    }

    pub fn status_of(&self, other: &TestNode) -> Option<ContactStatus> {
        self.profile(other).map(|p| p.status)
    }
}

pub struct Net {
    pub transport: Loopback,
}

impl Net {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();
        Self {
            transport: Loopback::default(),
        }
    }

    pub fn node(&self, id: &str, name: &str, seed: u8) -> TestNode {
        self.node_with(id, name, seed, ProtocolConfig::default())
    }

    pub fn node_with(&self, id: &str, name: &str, seed: u8, config: ProtocolConfig) -> TestNode {
        let id: PeerId = id.parse().unwrap();
        let store = Arc::new(MemoryStore::new());
        let keyring = Arc::new(LocalKeyring::from_seed([seed; 32]));
        let mut own = ContactProfile::new(id.clone(), ContactStatus::Myself, name);
        own.key_id = Some(keyring.own_key_id());
        store.add_or_update_profile(own).unwrap();

        let config = config.send_delay(Duration::ZERO);
        let node = Node::new(
            store.clone(),
            keyring.clone(),
            config,
            Arc::new(self.transport.clone()),
        );
        TestNode {
            id,
            node: Arc::new(node),
            store,
            keyring,
        }
    }

    pub fn set_offline(&self, node: &TestNode, offline: bool) {
        let mut wire = self.transport.wire.lock().unwrap();
        if offline {
            wire.offline.insert(node.id.clone());
        } else {
            wire.offline.remove(&node.id);
        }
    }

    /// Hand every waiting frame for `node` to it.
    pub fn pump(&self, node: &TestNode) -> Vec<Option<Disposition>> {
        let frames: Vec<Vec<u8>> = {
            let mut wire = self.transport.wire.lock().unwrap();
            wire.mailboxes
                .get_mut(&node.id)
                .map(|q| q.drain(..).collect())
                .unwrap_or_default()
        };
        frames.iter().map(|f| node.node.handle_frame(f)).collect()
    }

    pub fn pending_for(&self, node: &TestNode) -> usize {
        let wire = self.transport.wire.lock().unwrap();
        wire.mailboxes.get(&node.id).map_or(0, VecDeque::len)
    }
}

/// Make `a` and `b` mutual contacts with `status`, keys exchanged.
pub fn befriend(a: &TestNode, b: &TestNode, status: ContactStatus) {
    for (me, other) in [(a, b), (b, a)] {
        let key_id = me
            .keyring
            .import_public_key(&other.keyring.export_public_key())
            .unwrap();
        let name = other.store.own_profile().unwrap().unwrap().display_name;
        let mut profile = ContactProfile::new(other.id.clone(), status, name);
        profile.key_id = Some(key_id);
        me.store.add_or_update_profile(profile).unwrap();
    }
}
