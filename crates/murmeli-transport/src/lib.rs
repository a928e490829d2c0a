//! Murmeli transport layer.
//!
//! Peers are addressed by their hidden-service identity. Delivery is
//! "connect to `<id>.onion:<port>`, write one frame, close": there is no
//! application-level acknowledgement and no reply channel.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use murmeli_transport::{FrameListener, OnionSender, PeerId, TransportConfig};
//!
//! # async fn example() -> Result<(), murmeli_transport::TransportError> {
//! let config = TransportConfig::new().socks_proxy("127.0.0.1:9050".parse().unwrap());
//! let listener = FrameListener::bind(&config).await?;
//! let (handle, mut frames) = listener.into_parts();
//!
//! let sender = OnionSender::new(config);
//! let peer: PeerId = "abcdefghijklmnop".parse()?;
//! sender.send(&peer, b"murmeli...").await?;
//!
//! if let Some(frame) = frames.recv().await {
//!     println!("got {} bytes", frame.len());
//! }
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod listener;
mod protocol;
mod sender;
mod socks;

pub use config::TransportConfig;
pub use error::TransportError;
pub use listener::{FrameListener, ListenerHandle};
pub use sender::OnionSender;

use std::fmt;
use std::str::FromStr;

/// Port every Murmeli hidden service listens on.
pub const DEFAULT_ONION_PORT: u16 = 11009;

/// Murmeli network identity: the hidden-service address without `.onion`.
///
/// Between 16 and 56 lowercase alphanumeric characters. Parsing lowercases
/// and strips a trailing `.onion` if present.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Shortest accepted identity (legacy v2 services).
    pub const MIN_LEN: usize = 16;
    /// Longest accepted identity (v3 services).
    pub const MAX_LEN: usize = 56;

    /// The identity as a plain string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host name to hand to the SOCKS proxy.
    pub fn onion_host(&self) -> String {
        format!("{}.onion", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = if self.0.len() > 12 { &self.0[..12] } else { &self.0 };
        write!(f, "PeerId({short}...)")
    }
}

impl FromStr for PeerId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed.strip_suffix(".onion").unwrap_or(trimmed);
        let valid_len = (Self::MIN_LEN..=Self::MAX_LEN).contains(&bare.len());
        if !valid_len || !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TransportError::InvalidPeerId(s.to_string()));
        }
        Ok(Self(bare.to_ascii_lowercase()))
    }
}

impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
