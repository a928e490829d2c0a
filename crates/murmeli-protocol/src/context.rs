use std::sync::Arc;

use murmeli_transport::PeerId;

use crate::keyring::Keyring;
use crate::online::OnlineTracker;
use crate::profile::ContactProfile;
use crate::store::Store;
use crate::{ProtocolConfig, ProtocolError};

/// Shared collaborators handed to every protocol component.
#[derive(Clone)]
pub struct NodeContext {
    pub store: Arc<dyn Store>,
    pub keyring: Arc<dyn Keyring>,
    pub online: Arc<OnlineTracker>,
    pub config: Arc<ProtocolConfig>,
}

impl NodeContext {
    pub fn new(store: Arc<dyn Store>, keyring: Arc<dyn Keyring>, config: ProtocolConfig) -> Self {
        Self {
            store,
            keyring,
            online: Arc::new(OnlineTracker::new()),
            config: Arc::new(config),
        }
    }

    pub fn own_profile(&self) -> Result<ContactProfile, ProtocolError> {
        self.store
            .own_profile()?
            .ok_or(ProtocolError::MissingOwnProfile)
    }

    pub fn own_id(&self) -> Result<PeerId, ProtocolError> {
        Ok(self.own_profile()?.tor_id)
    }
}
