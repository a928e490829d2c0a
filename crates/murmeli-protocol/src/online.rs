/// Which contacts we currently believe are reachable.
///
/// Fed by status notifications and by the outcome of sends; read by the
/// delivery engine to order its passes.
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use murmeli_transport::PeerId;

#[derive(Default)]
struct OnlineState {
    online: HashSet<PeerId>,
    /// Unix seconds of the last sign of life, kept after going offline.
    last_seen: HashMap<PeerId, i64>,
}

#[derive(Default)]
pub struct OnlineTracker {
    state: Mutex<OnlineState>,
}

impl OnlineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OnlineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_online(&self, peer: &PeerId) {
        self.set_online_at(peer, chrono::Utc::now().timestamp());
    }

    /// Record presence at a given time (for testing).
    pub fn set_online_at(&self, peer: &PeerId, timestamp: i64) {
        let mut state = self.lock();
        state.online.insert(peer.clone());
        state.last_seen.insert(peer.clone(), timestamp);
    }

    pub fn set_offline(&self, peer: &PeerId) {
        self.lock().online.remove(peer);
    }

    pub fn is_online(&self, peer: &PeerId) -> bool {
        self.lock().online.contains(peer)
    }

    pub fn last_seen(&self, peer: &PeerId) -> Option<i64> {
        self.lock().last_seen.get(peer).copied()
    }

    pub fn online_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<_> = self.lock().online.iter().cloned().collect();
        ids.sort();
        ids
    }
}
