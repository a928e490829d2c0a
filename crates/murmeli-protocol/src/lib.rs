//! Murmeli protocol layer.
//!
//! Store-and-forward messaging between hidden-service peers on top of
//! `murmeli-transport`: a binary frame codec, a contact trust state
//! machine, an inbox dispatcher and an outbox delivery engine with relay
//! fallback through trusted friends.
//!
//! Frames: magic-delimited, MD5-checked, length-prefixed (see [`codec`]).
//! Crypto: Ed25519 signatures + X25519 / XChaCha20-Poly1305 encryption.

pub mod codec;
pub mod config;
pub mod contacts;
pub mod context;
mod crypto;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod gateway;
pub mod keyring;
pub mod message;
pub mod online;
pub mod profile;
pub mod relay_cache;
pub mod runtime;
pub mod store;
pub mod transport;

pub use config::{DispatcherKind, ProtocolConfig};
pub use contacts::{AcceptResult, SharedContacts, TrustManager};
pub use context::NodeContext;
pub use delivery::{DeliveryEngine, DeliveryWorker, FlushOutcome, SendOutcome};
pub use dispatcher::{Disposition, Dispatcher};
pub use error::{ProtocolError, StoreError};
pub use gateway::{Decrypter, Encrypter, IdentityGateway, KeyringDecrypter, KeyringEncrypter};
pub use keyring::{Keyring, LocalKeyring};
pub use message::{EncType, Message, MessageType, ReferralType};
pub use online::OnlineTracker;
pub use profile::{ContactProfile, ContactStatus, PublicProfile};
pub use runtime::{Node, RuntimeHandle};
pub use store::{InboxRow, MemoryStore, OutboxRow, PendingContact, Recipient, SqliteStore, Store};
pub use transport::Transport;

pub use murmeli_transport::PeerId;
