//! Typed messages: one struct, a type tag, and a per-type registry.

use std::collections::BTreeMap;
use std::fmt;

use murmeli_transport::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// Wire names of message fields.
pub mod field {
    pub const SENDER_ID: &str = "senderId";
    pub const SENDER_NAME: &str = "senderName";
    pub const MESSAGE: &str = "message";
    pub const PUBLIC_KEY: &str = "publicKey";
    pub const KEY_ID: &str = "keyId";
    pub const ONLINE: &str = "online";
    pub const PING: &str = "ping";
    pub const PROFILE: &str = "profile";
    pub const PROFILE_HASH: &str = "profileHash";
    pub const MESSAGE_BODY: &str = "messageBody";
    pub const PARENT_HASH: &str = "parentHash";
    pub const RECIPIENTS: &str = "recipients";
    pub const FRIEND_ID: &str = "friendId";
    pub const FRIEND_NAME: &str = "friendName";
    pub const REFERRAL_TYPE: &str = "referralType";
}

/// Message type tag, one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    ContactRequest = 1,
    ContactAccept = 2,
    ContactDeny = 3,
    StatusNotify = 4,
    Regular = 5,
    Relay = 6,
    InfoRequest = 7,
    InfoResponse = 8,
    ContactReferral = 9,
    ContactReferRequest = 10,
}

impl MessageType {
    pub const ALL: [MessageType; 10] = [
        MessageType::ContactRequest,
        MessageType::ContactAccept,
        MessageType::ContactDeny,
        MessageType::StatusNotify,
        MessageType::Regular,
        MessageType::Relay,
        MessageType::InfoRequest,
        MessageType::InfoResponse,
        MessageType::ContactReferral,
        MessageType::ContactReferRequest,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as u8 == value)
    }

    /// Registry entry for this type.
    pub fn spec(self) -> &'static VariantSpec {
        use MessageType::*;
        match self {
            ContactRequest => &CONTACT_REQUEST,
            ContactAccept => &CONTACT_ACCEPT,
            ContactDeny => &CONTACT_DENY,
            StatusNotify => &STATUS_NOTIFY,
            Regular => &REGULAR,
            Relay => &RELAY,
            InfoRequest => &INFO_REQUEST,
            InfoResponse => &INFO_RESPONSE,
            ContactReferral => &CONTACT_REFERRAL,
            ContactReferRequest => &CONTACT_REFER_REQUEST,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a payload is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncType {
    /// Cleartext, used before any key exchange.
    None = 0,
    /// Encrypted for the recipient and signed by the sender.
    Asymmetric = 1,
    /// Signed parcel carrying another frame.
    Relay = 3,
}

impl EncType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EncType::None),
            1 => Some(EncType::Asymmetric),
            3 => Some(EncType::Relay),
            _ => None,
        }
    }
}

/// Static properties of one message type.
#[derive(Debug)]
pub struct VariantSpec {
    pub enc_type: EncType,
    /// Fields that must be present before the message may be queued.
    pub required: &'static [&'static str],
    /// Fields carried when present.
    pub optional: &'static [&'static str],
    pub queued: bool,
    pub relayed: bool,
    pub must_be_trusted: bool,
}

impl VariantSpec {
    fn carries(&self, name: &str) -> bool {
        self.required.contains(&name) || self.optional.contains(&name)
    }
}

static CONTACT_REQUEST: VariantSpec = VariantSpec {
    enc_type: EncType::None,
    required: &[field::SENDER_NAME, field::MESSAGE],
    optional: &[field::PUBLIC_KEY, field::KEY_ID],
    queued: true,
    relayed: false,
    must_be_trusted: false,
};

static CONTACT_DENY: VariantSpec = VariantSpec {
    enc_type: EncType::None,
    required: &[],
    optional: &[],
    queued: true,
    relayed: false,
    must_be_trusted: false,
};

static CONTACT_ACCEPT: VariantSpec = VariantSpec {
    enc_type: EncType::Asymmetric,
    required: &[field::SENDER_NAME, field::MESSAGE, field::PUBLIC_KEY],
    optional: &[],
    queued: true,
    relayed: false,
    must_be_trusted: false,
};

static STATUS_NOTIFY: VariantSpec = VariantSpec {
    enc_type: EncType::Asymmetric,
    required: &[field::ONLINE, field::PING],
    optional: &[field::PROFILE_HASH],
    queued: false,
    relayed: false,
    must_be_trusted: true,
};

static INFO_REQUEST: VariantSpec = VariantSpec {
    enc_type: EncType::Asymmetric,
    required: &[],
    optional: &[],
    queued: true,
    relayed: false,
    must_be_trusted: true,
};

static INFO_RESPONSE: VariantSpec = VariantSpec {
    enc_type: EncType::Asymmetric,
    required: &[field::PROFILE, field::PROFILE_HASH],
    optional: &[],
    queued: true,
    relayed: false,
    must_be_trusted: true,
};

static REGULAR: VariantSpec = VariantSpec {
    enc_type: EncType::Asymmetric,
    required: &[field::MESSAGE_BODY],
    optional: &[field::PARENT_HASH, field::RECIPIENTS],
    queued: true,
    relayed: true,
    must_be_trusted: false,
};

static CONTACT_REFERRAL: VariantSpec = VariantSpec {
    enc_type: EncType::Asymmetric,
    required: &[
        field::FRIEND_ID,
        field::FRIEND_NAME,
        field::MESSAGE,
        field::REFERRAL_TYPE,
    ],
    optional: &[field::PUBLIC_KEY],
    queued: true,
    relayed: true,
    must_be_trusted: true,
};

static CONTACT_REFER_REQUEST: VariantSpec = VariantSpec {
    enc_type: EncType::Asymmetric,
    required: &[field::FRIEND_ID, field::MESSAGE],
    optional: &[],
    queued: true,
    relayed: true,
    must_be_trusted: true,
};

static RELAY: VariantSpec = VariantSpec {
    enc_type: EncType::Relay,
    required: &[],
    optional: &[],
    queued: false,
    relayed: false,
    must_be_trusted: true,
};

/// Sub-kind of a [`MessageType::ContactReferral`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralType {
    /// "You should meet my friend."
    Normal,
    /// "This is my robot."
    Robot,
    /// "I no longer have a robot."
    RemoveRobot,
}

impl ReferralType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferralType::Normal => "normal",
            ReferralType::Robot => "robot",
            ReferralType::RemoveRobot => "removerobot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(ReferralType::Normal),
            "robot" => Some(ReferralType::Robot),
            "removerobot" => Some(ReferralType::RemoveRobot),
            _ => None,
        }
    }
}

/// One protocol message.
///
/// `recipients` and the `should_*` flags are delivery metadata and never
/// leave the node. `signature_key_id` is only set on decoded messages whose
/// signature verified against a known key.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub msg_type: MessageType,
    pub enc_type: EncType,
    pub sender_id: Option<PeerId>,
    pub fields: BTreeMap<String, Value>,
    /// Seconds since the epoch; minute precision survives the wire.
    pub timestamp: Option<i64>,
    pub recipients: Vec<PeerId>,
    pub should_be_queued: bool,
    pub should_be_relayed: bool,
    pub sender_must_be_trusted: bool,
    pub signature_key_id: Option<String>,
    /// Carried frame, for relay messages only.
    pub parcel: Option<Vec<u8>>,
}

impl Message {
    /// Empty message of `msg_type` with the registry defaults.
    pub fn new(msg_type: MessageType) -> Self {
        let spec = msg_type.spec();
        Self {
            msg_type,
            enc_type: spec.enc_type,
            sender_id: None,
            fields: BTreeMap::new(),
            timestamp: None,
            recipients: Vec::new(),
            should_be_queued: spec.queued,
            should_be_relayed: spec.relayed,
            sender_must_be_trusted: spec.must_be_trusted,
            signature_key_id: None,
            parcel: None,
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Add a recipient.
    pub fn to(mut self, recipient: PeerId) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn with_timestamp(mut self, secs: i64) -> Self {
        self.timestamp = Some(secs);
        self
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Booleans also accept 0/1 numbers.
    pub fn field_bool(&self, name: &str) -> Option<bool> {
        match self.fields.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        }
    }

    /// Required fields not yet set.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.msg_type
            .spec()
            .required
            .iter()
            .copied()
            .filter(|name| !self.fields.contains_key(*name))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Error out unless every required field is present.
    pub fn ensure_complete(&self) -> Result<(), ProtocolError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::IncompleteMessage { missing })
        }
    }

    /// The JSON object written on the wire: known fields plus the sender.
    pub(crate) fn wire_fields(&self) -> serde_json::Map<String, Value> {
        let spec = self.msg_type.spec();
        let mut map: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .filter(|(k, _)| spec.carries(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(sender) = &self.sender_id {
            map.insert(field::SENDER_ID.to_string(), Value::from(sender.as_str()));
        }
        map
    }

    /// Rebuild a message of `msg_type` from a received JSON object.
    pub(crate) fn from_wire_fields(
        msg_type: MessageType,
        map: serde_json::Map<String, Value>,
    ) -> Result<Self, ProtocolError> {
        let spec = msg_type.spec();
        let mut msg = Message::new(msg_type);
        for (k, v) in map {
            if k == field::SENDER_ID {
                let id = v
                    .as_str()
                    .ok_or_else(|| ProtocolError::frame("senderId is not a string"))?;
                let id = id
                    .parse()
                    .map_err(|_| ProtocolError::frame(format!("bad senderId {id:?}")))?;
                msg.sender_id = Some(id);
            } else if spec.carries(&k) {
                msg.fields.insert(k, v);
            }
        }
        Ok(msg)
    }

    // ── Constructors ──────────────────────────────────────────────────

    pub fn contact_request(sender_name: &str, intro: &str) -> Self {
        Message::new(MessageType::ContactRequest)
            .with_field(field::SENDER_NAME, sender_name)
            .with_field(field::MESSAGE, intro)
    }

    pub fn contact_accept(sender_name: &str, intro: &str, public_key: &str) -> Self {
        Message::new(MessageType::ContactAccept)
            .with_field(field::SENDER_NAME, sender_name)
            .with_field(field::MESSAGE, intro)
            .with_field(field::PUBLIC_KEY, public_key)
    }

    pub fn contact_deny() -> Self {
        Message::new(MessageType::ContactDeny)
    }

    /// `ping` asks the peer to answer with its own status.
    pub fn status_notify(online: bool, ping: bool) -> Self {
        Message::new(MessageType::StatusNotify)
            .with_field(field::ONLINE, online)
            .with_field(field::PING, ping)
    }

    pub fn info_request() -> Self {
        Message::new(MessageType::InfoRequest)
    }

    pub fn info_response(profile_json: &str, profile_hash: &str) -> Self {
        Message::new(MessageType::InfoResponse)
            .with_field(field::PROFILE, profile_json)
            .with_field(field::PROFILE_HASH, profile_hash)
    }

    pub fn regular(body: &str) -> Self {
        Message::new(MessageType::Regular).with_field(field::MESSAGE_BODY, body)
    }

    pub fn contact_referral(
        friend_id: &PeerId,
        friend_name: &str,
        intro: &str,
        kind: ReferralType,
    ) -> Self {
        Message::new(MessageType::ContactReferral)
            .with_field(field::FRIEND_ID, friend_id.as_str())
            .with_field(field::FRIEND_NAME, friend_name)
            .with_field(field::MESSAGE, intro)
            .with_field(field::REFERRAL_TYPE, kind.as_str())
    }

    pub fn refer_request(friend_id: &PeerId, intro: &str) -> Self {
        Message::new(MessageType::ContactReferRequest)
            .with_field(field::FRIEND_ID, friend_id.as_str())
            .with_field(field::MESSAGE, intro)
    }

    /// Wrap an already-signed parcel for forwarding.
    pub fn relay(parcel: Vec<u8>) -> Self {
        let mut msg = Message::new(MessageType::Relay);
        msg.parcel = Some(parcel);
        msg
    }
}
