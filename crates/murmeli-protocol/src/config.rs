use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which inbound behaviour a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherKind {
    /// A person: requests wait for review, messages land in the inbox.
    #[default]
    Regular,
    /// Automation peer that only talks to its configured owner.
    Robot,
    /// Echo bot: accepts everyone and repeats what it hears.
    Parrot,
}

/// Configuration for the protocol core.
///
/// ```rust
/// use std::time::Duration;
/// use murmeli_protocol::ProtocolConfig;
///
/// let config = ProtocolConfig::default()
///     .flush_interval(Duration::from_secs(5))
///     .send_delay(Duration::ZERO);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Store contact requests from strangers for review.
    pub allow_unsolicited_requests: bool,
    /// Advertise our contact list inside our public profile.
    pub friends_see_friends: bool,
    /// Key id of the owner a robot will accept.
    pub robot_owner_key_id: Option<String>,
    /// Period of the background outbox flush.
    #[serde(with = "secs")]
    pub flush_interval: Duration,
    /// How long a flush waits for the outbox lock before giving up.
    #[serde(with = "secs")]
    pub flush_lock_timeout: Duration,
    /// Pause between two sends inside one flush pass.
    #[serde(with = "secs")]
    pub send_delay: Duration,
    pub dispatcher: DispatcherKind,
    /// How long a relayed parcel is remembered to suppress repeats.
    #[serde(with = "secs")]
    pub relay_cache_ttl: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            allow_unsolicited_requests: true,
            friends_see_friends: true,
            robot_owner_key_id: None,
            flush_interval: Duration::from_secs(30),
            flush_lock_timeout: Duration::from_secs(2),
            send_delay: Duration::from_secs(3),
            dispatcher: DispatcherKind::Regular,
            relay_cache_ttl: Duration::from_secs(600),
        }
    }
}

impl ProtocolConfig {
    pub fn allow_unsolicited_requests(mut self, allow: bool) -> Self {
        self.allow_unsolicited_requests = allow;
        self
    }

    pub fn friends_see_friends(mut self, share: bool) -> Self {
        self.friends_see_friends = share;
        self
    }

    pub fn robot_owner_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.robot_owner_key_id = Some(key_id.into());
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn flush_lock_timeout(mut self, timeout: Duration) -> Self {
        self.flush_lock_timeout = timeout;
        self
    }

    pub fn send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn dispatcher(mut self, kind: DispatcherKind) -> Self {
        self.dispatcher = kind;
        self
    }

    pub fn relay_cache_ttl(mut self, ttl: Duration) -> Self {
        self.relay_cache_ttl = ttl;
        self
    }
}

/// Durations as whole seconds in config files.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
