//! Contact profiles and their trust status.

use std::fmt;
use std::str::FromStr;

use murmeli_transport::PeerId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where a contact stands with us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    /// Our own profile.
    #[serde(rename = "self")]
    Myself,
    /// We sent a request and wait for an answer.
    Requested,
    /// We sent a request to become this robot's owner.
    Reqrobot,
    /// Keys exchanged, fingerprint not yet verified.
    Untrusted,
    Trusted,
    /// Our own robot.
    Robot,
    /// The owner of this (robot) node.
    Owner,
    Blocked,
    Deleted,
}

impl ContactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContactStatus::Myself => "self",
            ContactStatus::Requested => "requested",
            ContactStatus::Reqrobot => "reqrobot",
            ContactStatus::Untrusted => "untrusted",
            ContactStatus::Trusted => "trusted",
            ContactStatus::Robot => "robot",
            ContactStatus::Owner => "owner",
            ContactStatus::Blocked => "blocked",
            ContactStatus::Deleted => "deleted",
        }
    }

    /// Keys exchanged and not blocked: we can encrypt for them.
    pub fn is_messageable(self) -> bool {
        matches!(
            self,
            ContactStatus::Untrusted
                | ContactStatus::Trusted
                | ContactStatus::Robot
                | ContactStatus::Owner
        )
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ContactStatus::*;
        [Myself, Requested, Reqrobot, Untrusted, Trusted, Robot, Owner, Blocked, Deleted]
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown contact status {s:?}"))
    }
}

/// Everything we know about one peer (or ourselves).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactProfile {
    pub tor_id: PeerId,
    pub key_id: Option<String>,
    pub status: ContactStatus,
    /// Our local name for them; never overwritten by the peer.
    pub display_name: String,
    /// The name they chose for themselves.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Encoded list of (id, name) pairs they share, see [`encode_contact_list`].
    #[serde(default)]
    pub contact_list: String,
    /// Associated robot, if any.
    #[serde(default)]
    pub robot: Option<PeerId>,
    /// Hash of their public profile as last received.
    #[serde(default)]
    pub profile_hash: Option<String>,
}

impl ContactProfile {
    pub fn new(tor_id: PeerId, status: ContactStatus, display_name: impl Into<String>) -> Self {
        Self {
            tor_id,
            key_id: None,
            status,
            display_name: display_name.into(),
            name: String::new(),
            description: String::new(),
            contact_list: String::new(),
            robot: None,
            profile_hash: None,
        }
    }

    /// The name to show: ours for them, else theirs.
    pub fn shown_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// The part of a profile sent in an info response.
///
/// Status, key id and our local display name stay private.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "contactList")]
    pub contact_list: String,
    #[serde(default)]
    pub robot: String,
}

impl PublicProfile {
    /// Public view of our own profile. The contact list is only included
    /// when we share friends.
    pub fn of(own: &ContactProfile, contact_list: Option<String>) -> Self {
        let name = if own.name.is_empty() {
            &own.display_name
        } else {
            &own.name
        };
        Self {
            name: name.clone(),
            description: own.description.clone(),
            contact_list: contact_list.unwrap_or_default(),
            robot: own.robot.as_ref().map(|r| r.to_string()).unwrap_or_default(),
        }
    }

    /// SHA-256 hex over every field, in field-name order.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in [
            ("contactList", &self.contact_list),
            ("description", &self.description),
            ("name", &self.name),
            ("robot", &self.robot),
        ] {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// Encode (id, name) pairs as a JSON array of two-element arrays.
pub fn encode_contact_list(pairs: &[(PeerId, String)]) -> String {
    let list: Vec<(&str, &str)> = pairs
        .iter()
        .map(|(id, name)| (id.as_str(), name.as_str()))
        .collect();
    serde_json::to_string(&list).unwrap_or_else(|_| "[]".into())
}

/// Decode a contact list, accepting the JSON form or the older
/// comma-separated `id:name` form. Unparsable entries are skipped.
pub fn decode_contact_list(encoded: &str) -> Vec<(PeerId, String)> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(list) = serde_json::from_str::<Vec<(String, String)>>(trimmed) {
        return list
            .into_iter()
            .filter_map(|(id, name)| Some((id.parse().ok()?, name)))
            .collect();
    }
    trimmed
        .split(',')
        .filter_map(|entry| {
            let (id, name) = entry.split_once(':').unwrap_or((entry, ""));
            Some((id.trim().parse().ok()?, name.trim().to_string()))
        })
        .collect()
}
