/// Protocol-level errors for Murmeli.
///
/// Frame errors mean "no message": callers drop the bytes. Crypto and
/// incomplete-message errors stop an encode before anything is queued.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("message incomplete, missing: {}", missing.join(", "))]
    IncompleteMessage { missing: Vec<&'static str> },

    #[error("unknown contact: {0}")]
    UnknownContact(String),

    #[error("own profile missing from store")]
    MissingOwnProfile,

    #[error("contact change rejected: {reason}")]
    ContactRejected { reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] murmeli_transport::TransportError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl ProtocolError {
    pub(crate) fn frame(reason: impl Into<String>) -> Self {
        ProtocolError::InvalidFrame {
            reason: reason.into(),
        }
    }

    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        ProtocolError::ContactRejected {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Deserialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(e.to_string())
    }
}

/// Errors raised by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_frame() {
        let err = ProtocolError::frame("bad magic");
        assert_eq!(err.to_string(), "invalid frame: bad magic");
    }

    #[test]
    fn display_incomplete() {
        let err = ProtocolError::IncompleteMessage {
            missing: vec!["senderName", "message"],
        };
        assert_eq!(err.to_string(), "message incomplete, missing: senderName, message");
    }

    #[test]
    fn display_rejected() {
        let err = ProtocolError::rejected("already trusted");
        assert_eq!(err.to_string(), "contact change rejected: already trusted");
    }

    #[test]
    fn store_error_wraps() {
        let err: ProtocolError = StoreError::NotFound("outbox row 3".into()).into();
        assert_eq!(err.to_string(), "store error: not found: outbox row 3");
    }
}
