//! Parcels we already fanned out, so a flood through the friend graph
//! passes each node at most once.
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Upper bound on remembered parcels.
const MAX_CACHE_SIZE: usize = 10_000;

type ParcelKey = [u8; 32];

#[derive(Default)]
struct Seen {
    at: HashMap<ParcelKey, Instant>,
    /// Sightings oldest first; an entry is stale once `at` holds a newer time.
    order: VecDeque<(ParcelKey, Instant)>,
}

impl Seen {
    fn pop_oldest(&mut self) {
        if let Some((key, at)) = self.order.pop_front() {
            if self.at.get(&key) == Some(&at) {
                self.at.remove(&key);
            }
        }
    }
}

pub struct RelayCache {
    seen: Mutex<Seen>,
    ttl: Duration,
}

impl RelayCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(Seen::default()),
            ttl,
        }
    }

    /// Record `parcel`; `true` if it was not seen within the TTL.
    pub fn first_sighting(&self, parcel: &[u8]) -> bool {
        self.first_sighting_at(parcel, Instant::now())
    }

    pub(crate) fn first_sighting_at(&self, parcel: &[u8], now: Instant) -> bool {
        let key: ParcelKey = Sha256::digest(parcel).into();
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(at) = seen.at.get(&key) {
            if now.saturating_duration_since(*at) < self.ttl {
                return false;
            }
        }
        while let Some((_, at)) = seen.order.front() {
            if now.saturating_duration_since(*at) < self.ttl {
                break;
            }
            seen.pop_oldest();
        }
        while seen.at.len() >= MAX_CACHE_SIZE {
            seen.pop_oldest();
        }
        seen.at.insert(key, now);
        seen.order.push_back((key, now));
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
