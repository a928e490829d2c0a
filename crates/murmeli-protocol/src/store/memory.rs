use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use murmeli_transport::PeerId;

use super::{InboxRow, OutboxRow, PendingContact, Store};
use crate::profile::{ContactProfile, ContactStatus};
use crate::StoreError;

#[derive(Default)]
struct Inner {
    profiles: BTreeMap<PeerId, ContactProfile>,
    outbox: BTreeMap<u64, OutboxRow>,
    inbox: BTreeMap<u64, InboxRow>,
    pending: Vec<PendingContact>,
    next_outbox_id: u64,
    next_inbox_id: u64,
    next_conversation_id: u64,
}

/// Volatile store, one mutex around everything.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn own_profile(&self) -> Result<Option<ContactProfile>, StoreError> {
        Ok(self
            .lock()
            .profiles
            .values()
            .find(|p| p.status == ContactStatus::Myself)
            .cloned())
    }

    fn get_profile(&self, id: &PeerId) -> Result<Option<ContactProfile>, StoreError> {
        Ok(self.lock().profiles.get(id).cloned())
    }

    fn get_profiles_with_status(
        &self,
        statuses: &[ContactStatus],
    ) -> Result<Vec<ContactProfile>, StoreError> {
        Ok(self
            .lock()
            .profiles
            .values()
            .filter(|p| statuses.contains(&p.status))
            .cloned()
            .collect())
    }

    fn find_profile_by_key_id(&self, key_id: &str) -> Result<Option<ContactProfile>, StoreError> {
        Ok(self
            .lock()
            .profiles
            .values()
            .find(|p| p.key_id.as_deref() == Some(key_id))
            .cloned())
    }

    fn add_or_update_profile(&self, profile: ContactProfile) -> Result<(), StoreError> {
        self.lock().profiles.insert(profile.tor_id.clone(), profile);
        Ok(())
    }

    fn get_outbox(&self) -> Result<Vec<OutboxRow>, StoreError> {
        Ok(self.lock().outbox.values().cloned().collect())
    }

    fn add_row_to_outbox(&self, mut row: OutboxRow) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        inner.next_outbox_id += 1;
        row.id = inner.next_outbox_id;
        inner.outbox.insert(row.id, row);
        Ok(inner.next_outbox_id)
    }

    fn update_outbox_row(&self, row: &OutboxRow) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.outbox.get_mut(&row.id) {
            Some(existing) => {
                *existing = row.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("outbox row {}", row.id))),
        }
    }

    fn delete_from_outbox(&self, id: u64) -> Result<(), StoreError> {
        self.lock().outbox.remove(&id);
        Ok(())
    }

    fn get_inbox(&self) -> Result<Vec<InboxRow>, StoreError> {
        Ok(self
            .lock()
            .inbox
            .values()
            .filter(|r| !r.deleted)
            .cloned()
            .collect())
    }

    fn add_row_to_inbox(&self, mut row: InboxRow) -> Result<Option<u64>, StoreError> {
        let mut inner = self.lock();
        let duplicate = inner
            .inbox
            .values()
            .any(|r| !r.deleted && r.message_hash == row.message_hash);
        if duplicate {
            return Ok(None);
        }
        inner.next_inbox_id += 1;
        row.id = inner.next_inbox_id;
        row.deleted = false;
        inner.inbox.insert(row.id, row);
        Ok(Some(inner.next_inbox_id))
    }

    fn delete_from_inbox(&self, id: u64) -> Result<(), StoreError> {
        if let Some(row) = self.lock().inbox.get_mut(&id) {
            row.deleted = true;
        }
        Ok(())
    }

    fn find_inbox_by_hash(&self, hash: &str) -> Result<Option<InboxRow>, StoreError> {
        Ok(self
            .lock()
            .inbox
            .values()
            .find(|r| !r.deleted && r.message_hash == hash)
            .cloned())
    }

    fn new_conversation_id(&self) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        inner.next_conversation_id += 1;
        Ok(inner.next_conversation_id)
    }

    fn add_pending_contact(&self, contact: PendingContact) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.pending.retain(|p| p.from_id != contact.from_id);
        inner.pending.push(contact);
        Ok(())
    }

    fn pending_contacts(&self) -> Result<Vec<PendingContact>, StoreError> {
        Ok(self.lock().pending.clone())
    }
}
