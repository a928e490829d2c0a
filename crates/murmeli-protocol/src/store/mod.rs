//! Persisted state: profiles, outbox, inbox.
//!
//! Everything that the delivery engine, dispatcher and trust manager
//! share goes through [`Store`]. Implementations do their own locking.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use murmeli_transport::PeerId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::message::{EncType, MessageType, ReferralType};
use crate::profile::{ContactProfile, ContactStatus};
use crate::StoreError;

/// Who an outbox row is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recipient {
    /// A message for one contact.
    Single(PeerId),
    /// A relay fan-out; delivered ids are removed as we go.
    List(Vec<PeerId>),
}

/// One queued frame.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRow {
    /// Assigned by the store; stable while the row exists.
    pub id: u64,
    pub recipient: Recipient,
    /// The encoded frame.
    pub message: Vec<u8>,
    pub enc_type: EncType,
    pub msg_type: MessageType,
    /// Keep retrying (and try relays) when direct delivery fails.
    pub queue: bool,
    /// Relay contacts still to try, in order.
    pub relays: Vec<PeerId>,
    /// Signed relay frame, built on the first relay attempt.
    pub relay_message: Option<Vec<u8>>,
}

impl OutboxRow {
    pub fn new(recipient: Recipient, message: Vec<u8>, enc_type: EncType, msg_type: MessageType) -> Self {
        Self {
            id: 0,
            recipient,
            message,
            enc_type,
            msg_type,
            queue: false,
            relays: Vec::new(),
            relay_message: None,
        }
    }
}

/// One received message kept for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxRow {
    #[serde(default)]
    pub id: u64,
    pub message_type: MessageType,
    pub from_id: PeerId,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub message_body: String,
    pub timestamp: i64,
    /// Dedup key, see [`message_hash`].
    pub message_hash: String,
    #[serde(default)]
    pub parent_hash: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<u64>,
    #[serde(default)]
    pub recipients: Vec<PeerId>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub friend_id: Option<PeerId>,
    #[serde(default)]
    pub friend_name: Option<String>,
    #[serde(default)]
    pub referral_type: Option<ReferralType>,
    #[serde(default)]
    pub deleted: bool,
}

impl InboxRow {
    pub fn new(message_type: MessageType, from_id: PeerId, body: impl Into<String>, timestamp: i64) -> Self {
        let message_body = body.into();
        let message_hash = message_hash(&message_body, timestamp, &from_id);
        Self {
            id: 0,
            message_type,
            from_id,
            from_name: String::new(),
            message_body,
            timestamp,
            message_hash,
            parent_hash: None,
            conversation_id: None,
            recipients: Vec::new(),
            public_key: None,
            key_id: None,
            friend_id: None,
            friend_name: None,
            referral_type: None,
            deleted: false,
        }
    }
}

/// Content address of a received message: SHA-256 hex over body,
/// timestamp and sender.
pub fn message_hash(body: &str, timestamp: i64, sender: &PeerId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(sender.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// An accept that arrived without a matching request of ours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingContact {
    pub from_id: PeerId,
    pub from_name: String,
    pub public_key: String,
    pub message: String,
}

/// Row-based persistence used by the protocol core.
pub trait Store: Send + Sync {
    /// The profile with status `self`.
    fn own_profile(&self) -> Result<Option<ContactProfile>, StoreError>;
    fn get_profile(&self, id: &PeerId) -> Result<Option<ContactProfile>, StoreError>;
    fn get_profiles_with_status(
        &self,
        statuses: &[ContactStatus],
    ) -> Result<Vec<ContactProfile>, StoreError>;
    fn find_profile_by_key_id(&self, key_id: &str) -> Result<Option<ContactProfile>, StoreError>;
    /// Insert, or replace the profile with the same `tor_id`.
    fn add_or_update_profile(&self, profile: ContactProfile) -> Result<(), StoreError>;

    /// Rows in insertion order.
    fn get_outbox(&self) -> Result<Vec<OutboxRow>, StoreError>;
    /// Returns the new row id.
    fn add_row_to_outbox(&self, row: OutboxRow) -> Result<u64, StoreError>;
    fn update_outbox_row(&self, row: &OutboxRow) -> Result<(), StoreError>;
    fn delete_from_outbox(&self, id: u64) -> Result<(), StoreError>;

    /// Rows that are not soft-deleted.
    fn get_inbox(&self) -> Result<Vec<InboxRow>, StoreError>;
    /// `None` when a live row with the same hash already exists.
    fn add_row_to_inbox(&self, row: InboxRow) -> Result<Option<u64>, StoreError>;
    /// Soft delete.
    fn delete_from_inbox(&self, id: u64) -> Result<(), StoreError>;
    fn find_inbox_by_hash(&self, hash: &str) -> Result<Option<InboxRow>, StoreError>;
    fn new_conversation_id(&self) -> Result<u64, StoreError>;

    /// Replaces an earlier entry from the same sender.
    fn add_pending_contact(&self, contact: PendingContact) -> Result<(), StoreError>;
    fn pending_contacts(&self) -> Result<Vec<PendingContact>, StoreError>;
}
