//! Contact trust state machine.
//!
//! ```text
//! none | deleted | robot placeholder --initiate--> requested | reqrobot
//! requested | reqrobot | untrusted --accept received--> untrusted | robot
//! requested | reqrobot --deny received--> deleted
//! untrusted --fingerprint checked--> trusted
//! any --delete--> deleted,  any --block--> blocked
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use murmeli_transport::PeerId;

use crate::context::NodeContext;
use crate::delivery::DeliveryEngine;
use crate::message::{field, Message, MessageType, ReferralType};
use crate::profile::{decode_contact_list, encode_contact_list, ContactProfile, ContactStatus, PublicProfile};
use crate::store::PendingContact;
use crate::ProtocolError;

/// Partition of our contacts against a candidate's advertised list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedContacts {
    /// Contacts we both have.
    pub shared: BTreeSet<PeerId>,
    /// Our trusted contacts they do not have.
    pub suggest_to_them: BTreeSet<PeerId>,
    /// Their contacts we do not have.
    pub suggest_to_me: BTreeSet<PeerId>,
    pub names: BTreeMap<PeerId, String>,
}

/// What receiving a contact accept led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptResult {
    /// The sender is now a contact with this status.
    Accepted(ContactStatus),
    /// We never asked: parked in pending contacts.
    Pending,
}

pub struct TrustManager {
    ctx: NodeContext,
    engine: Arc<DeliveryEngine>,
}

impl TrustManager {
    pub fn new(engine: Arc<DeliveryEngine>) -> Self {
        Self {
            ctx: engine.context().clone(),
            engine,
        }
    }

    fn profile(&self, id: &PeerId) -> Result<Option<ContactProfile>, ProtocolError> {
        Ok(self.ctx.store.get_profile(id)?)
    }

    fn own_name(own: &ContactProfile) -> &str {
        if own.name.is_empty() {
            &own.display_name
        } else {
            &own.name
        }
    }

    // ── Outgoing requests ─────────────────────────────────────────────

    /// Ask `target` to become a contact (or, with `robot`, to become our robot).
    ///
    /// Fails without touching any profile if `target` is ourselves or
    /// already a live contact.
    pub fn initiate(
        &self,
        target: &PeerId,
        display_name: &str,
        intro: &str,
        robot: bool,
    ) -> Result<(), ProtocolError> {
        let mut own = self.ctx.own_profile()?;
        if *target == own.tor_id {
            return Err(ProtocolError::rejected("cannot send a contact request to ourselves"));
        }
        let existing = self.profile(target)?;
        if let Some(p) = &existing {
            let robot_placeholder = p.status == ContactStatus::Robot && p.key_id.is_none();
            if p.status != ContactStatus::Deleted && !robot_placeholder {
                return Err(ProtocolError::rejected(format!(
                    "{target} is already {}",
                    p.status
                )));
            }
        }

        let status = if robot {
            ContactStatus::Reqrobot
        } else {
            ContactStatus::Requested
        };
        let mut profile =
            existing.unwrap_or_else(|| ContactProfile::new(target.clone(), status, display_name));
        profile.status = status;
        if !display_name.is_empty() {
            profile.display_name = display_name.to_string();
        }
        self.ctx.store.add_or_update_profile(profile)?;

        let mut msg = Message::contact_request(Self::own_name(&own), intro).to(target.clone());
        if robot {
            msg.set_field(field::KEY_ID, self.ctx.keyring.own_key_id());
            own.robot = Some(target.clone());
            self.ctx.store.add_or_update_profile(own)?;
        } else {
            msg.set_field(field::PUBLIC_KEY, self.ctx.keyring.export_public_key());
        }
        self.engine.enqueue(msg)?;
        tracing::info!(peer = %target, robot, "contact requested");
        Ok(())
    }

    // ── Answering requests ────────────────────────────────────────────

    /// Accept a request waiting in the inbox.
    pub fn accept(&self, requester: &PeerId, intro: &str) -> Result<(), ProtocolError> {
        let requests: Vec<_> = self
            .ctx
            .store
            .get_inbox()?
            .into_iter()
            .filter(|r| r.message_type == MessageType::ContactRequest && r.from_id == *requester)
            .collect();
        let latest = requests
            .last()
            .ok_or_else(|| ProtocolError::UnknownContact(requester.to_string()))?;

        self.accept_request(
            requester,
            &latest.from_name,
            latest.public_key.as_deref(),
            latest.key_id.as_deref(),
            ContactStatus::Untrusted,
            intro,
        )?;
        for row in &requests {
            self.ctx.store.delete_from_inbox(row.id)?;
        }
        Ok(())
    }

    /// Learn the requester's key, record them with `status` and answer
    /// with our public key.
    pub fn accept_request(
        &self,
        from: &PeerId,
        from_name: &str,
        public_key: Option<&str>,
        key_id: Option<&str>,
        status: ContactStatus,
        intro: &str,
    ) -> Result<(), ProtocolError> {
        let own = self.ctx.own_profile()?;
        let key_id = match (public_key, key_id) {
            (Some(pk), _) => self.ctx.keyring.import_public_key(pk),
            (None, Some(id)) => self.ctx.keyring.public_key(id).map(|_| id.to_string()),
            (None, None) => None,
        }
        .ok_or_else(|| ProtocolError::Crypto(format!("no usable key for {from}")))?;

        let mut profile = self
            .profile(from)?
            .unwrap_or_else(|| ContactProfile::new(from.clone(), status, from_name));
        profile.key_id = Some(key_id);
        profile.status = status;
        profile.name = from_name.to_string();
        if profile.display_name.is_empty() {
            profile.display_name = from_name.to_string();
        }
        self.ctx.store.add_or_update_profile(profile)?;

        let reply = Message::contact_accept(
            Self::own_name(&own),
            intro,
            &self.ctx.keyring.export_public_key(),
        )
        .to(from.clone());
        self.engine.enqueue(reply)?;
        tracing::info!(peer = %from, %status, "contact accepted");
        Ok(())
    }

    /// Refuse a request: drop it from the inbox and tell the sender.
    ///
    /// Our own profile for the sender is left as it is.
    pub fn deny(&self, requester: &PeerId) -> Result<(), ProtocolError> {
        for row in self.ctx.store.get_inbox()? {
            if row.message_type == MessageType::ContactRequest && row.from_id == *requester {
                self.ctx.store.delete_from_inbox(row.id)?;
            }
        }
        self.engine.enqueue(Message::contact_deny().to(requester.clone()))?;
        tracing::info!(peer = %requester, "contact denied");
        Ok(())
    }

    // ── Incoming answers ──────────────────────────────────────────────

    pub fn receive_accept(
        &self,
        from: &PeerId,
        from_name: &str,
        public_key: &str,
        intro: &str,
    ) -> Result<AcceptResult, ProtocolError> {
        let profile = self.profile(from)?.filter(|p| {
            matches!(
                p.status,
                ContactStatus::Requested | ContactStatus::Reqrobot | ContactStatus::Untrusted
            )
        });
        let Some(mut profile) = profile else {
            tracing::info!(peer = %from, "unsolicited accept parked");
            self.ctx.store.add_pending_contact(PendingContact {
                from_id: from.clone(),
                from_name: from_name.to_string(),
                public_key: public_key.to_string(),
                message: intro.to_string(),
            })?;
            return Ok(AcceptResult::Pending);
        };

        let key_id = self
            .ctx
            .keyring
            .import_public_key(public_key)
            .ok_or_else(|| ProtocolError::Crypto(format!("bad public key from {from}")))?;
        let own = self.ctx.own_profile()?;
        let status = if own.robot.as_ref() == Some(from) {
            ContactStatus::Robot
        } else {
            ContactStatus::Untrusted
        };

        profile.key_id = Some(key_id);
        profile.status = status;
        profile.name = from_name.to_string();
        if profile.display_name.is_empty() {
            profile.display_name = from_name.to_string();
        }
        self.ctx.store.add_or_update_profile(profile)?;
        tracing::info!(peer = %from, %status, "contact established");

        if status == ContactStatus::Robot {
            self.announce_robot()?;
        }
        Ok(AcceptResult::Accepted(status))
    }

    pub fn receive_deny(&self, from: &PeerId) -> Result<(), ProtocolError> {
        if let Some(mut profile) = self.profile(from)? {
            if matches!(profile.status, ContactStatus::Requested | ContactStatus::Reqrobot) {
                profile.status = ContactStatus::Deleted;
                self.ctx.store.add_or_update_profile(profile)?;
                tracing::info!(peer = %from, "contact request denied");
            }
        }
        Ok(())
    }

    // ── User actions ──────────────────────────────────────────────────

    pub fn delete(&self, id: &PeerId) -> Result<(), ProtocolError> {
        self.set_status(id, ContactStatus::Deleted)
    }

    pub fn block(&self, id: &PeerId) -> Result<(), ProtocolError> {
        if self.profile(id)?.is_none() {
            let profile = ContactProfile::new(id.clone(), ContactStatus::Blocked, "");
            self.ctx.store.add_or_update_profile(profile)?;
            return Ok(());
        }
        self.set_status(id, ContactStatus::Blocked)
    }

    /// Upgrade after the fingerprints were compared out of band.
    pub fn set_trusted(&self, id: &PeerId) -> Result<(), ProtocolError> {
        match self.profile(id)? {
            Some(p) if p.status == ContactStatus::Untrusted => self.set_status(id, ContactStatus::Trusted),
            Some(p) => Err(ProtocolError::rejected(format!("{id} is {}, not untrusted", p.status))),
            None => Err(ProtocolError::UnknownContact(id.to_string())),
        }
    }

    fn set_status(&self, id: &PeerId, status: ContactStatus) -> Result<(), ProtocolError> {
        let mut profile = self
            .profile(id)?
            .ok_or_else(|| ProtocolError::UnknownContact(id.to_string()))?;
        if profile.status == ContactStatus::Myself {
            return Err(ProtocolError::rejected("cannot change our own status"));
        }
        profile.status = status;
        self.ctx.store.add_or_update_profile(profile)?;
        tracing::info!(peer = %id, %status, "contact status changed");
        Ok(())
    }

    // ── Sharing contacts ──────────────────────────────────────────────

    /// Our profile as others see it.
    pub fn public_profile(&self) -> Result<PublicProfile, ProtocolError> {
        let own = self.ctx.own_profile()?;
        let list = if self.ctx.config.friends_see_friends {
            let trusted: Vec<(PeerId, String)> = self
                .ctx
                .store
                .get_profiles_with_status(&[ContactStatus::Trusted])?
                .into_iter()
                .map(|p| (p.tor_id.clone(), p.shown_name().to_string()))
                .collect();
            Some(encode_contact_list(&trusted))
        } else {
            None
        };
        Ok(PublicProfile::of(&own, list))
    }

    /// Compare our contacts with what `candidate` advertises.
    ///
    /// Suggestions are only computed for a trusted candidate.
    pub fn get_shared_possible_contacts(&self, candidate: &PeerId) -> Result<SharedContacts, ProtocolError> {
        let own_id = self.ctx.own_id()?;
        let profile = self
            .profile(candidate)?
            .ok_or_else(|| ProtocolError::UnknownContact(candidate.to_string()))?;

        let mut result = SharedContacts::default();
        let mine: Vec<ContactProfile> = self
            .ctx
            .store
            .get_profiles_with_status(&[ContactStatus::Untrusted, ContactStatus::Trusted])?
            .into_iter()
            .filter(|p| p.tor_id != *candidate)
            .collect();
        let theirs: Vec<(PeerId, String)> = decode_contact_list(&profile.contact_list)
            .into_iter()
            .filter(|(id, _)| *id != own_id && id != candidate)
            .collect();

        let my_ids: BTreeSet<PeerId> = mine.iter().map(|p| p.tor_id.clone()).collect();
        let their_ids: BTreeSet<PeerId> = theirs.iter().map(|(id, _)| id.clone()).collect();
        for (id, name) in &theirs {
            result.names.insert(id.clone(), name.clone());
        }
        for p in &mine {
            result.names.insert(p.tor_id.clone(), p.shown_name().to_string());
        }

        result.shared = my_ids.intersection(&their_ids).cloned().collect();
        if profile.status == ContactStatus::Trusted {
            result.suggest_to_them = mine
                .iter()
                .filter(|p| p.status == ContactStatus::Trusted && !their_ids.contains(&p.tor_id))
                .map(|p| p.tor_id.clone())
                .collect();
            result.suggest_to_me = their_ids.difference(&my_ids).cloned().collect();
        }
        let keep: BTreeSet<&PeerId> = result
            .shared
            .iter()
            .chain(&result.suggest_to_them)
            .chain(&result.suggest_to_me)
            .collect();
        result.names.retain(|id, _| keep.contains(id));
        Ok(result)
    }

    /// Introduce our contact `friend` to our trusted contact `to`.
    pub fn send_referral(&self, to: &PeerId, friend: &PeerId, intro: &str) -> Result<(), ProtocolError> {
        self.require_trusted(to)?;
        let friend_profile = self
            .profile(friend)?
            .filter(|p| p.status.is_messageable())
            .ok_or_else(|| ProtocolError::UnknownContact(friend.to_string()))?;

        let mut msg = Message::contact_referral(friend, friend_profile.shown_name(), intro, ReferralType::Normal)
            .to(to.clone());
        if let Some(pk) = friend_profile.key_id.as_deref().and_then(|id| self.ctx.keyring.public_key(id)) {
            msg.set_field(field::PUBLIC_KEY, pk);
        }
        self.engine.enqueue(msg)?;
        Ok(())
    }

    /// Ask our trusted contact `to` to introduce us to `friend`.
    pub fn send_refer_request(&self, to: &PeerId, friend: &PeerId, intro: &str) -> Result<(), ProtocolError> {
        self.require_trusted(to)?;
        self.engine
            .enqueue(Message::refer_request(friend, intro).to(to.clone()))?;
        Ok(())
    }

    fn require_trusted(&self, id: &PeerId) -> Result<(), ProtocolError> {
        match self.profile(id)? {
            Some(p) if p.status == ContactStatus::Trusted => Ok(()),
            Some(p) => Err(ProtocolError::rejected(format!("{id} is {}, not trusted", p.status))),
            None => Err(ProtocolError::UnknownContact(id.to_string())),
        }
    }

    // ── Robots ────────────────────────────────────────────────────────

    /// Tell every trusted contact which robot is ours.
    pub fn announce_robot(&self) -> Result<(), ProtocolError> {
        let own = self.ctx.own_profile()?;
        let Some(robot) = own.robot.clone() else {
            return Ok(());
        };
        let name = format!("{} (robot)", Self::own_name(&own));
        let msg = Message::contact_referral(&robot, &name, "", ReferralType::Robot);
        self.engine.broadcast(msg, &[ContactStatus::Trusted])?;
        Ok(())
    }

    /// Forget our robot and tell every trusted contact.
    pub fn remove_robot(&self) -> Result<(), ProtocolError> {
        let mut own = self.ctx.own_profile()?;
        let Some(robot) = own.robot.take() else {
            return Ok(());
        };
        self.ctx.store.add_or_update_profile(own)?;
        if let Some(mut profile) = self.profile(&robot)? {
            profile.status = ContactStatus::Deleted;
            self.ctx.store.add_or_update_profile(profile)?;
        }
        let msg = Message::contact_referral(&robot, "", "", ReferralType::RemoveRobot);
        self.engine.broadcast(msg, &[ContactStatus::Trusted])?;
        tracing::info!(robot = %robot, "robot removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::{Keyring, LocalKeyring};
    use crate::store::{InboxRow, MemoryStore, Recipient, Store};
    use crate::transport::mock::MockTransport;
    use crate::ProtocolConfig;

    fn peer(s: &str) -> PeerId {
        s.parse().unwrap()
    }
    fn me() -> PeerId {
        peer("memememememememe")
    }
    fn bob() -> PeerId {
        peer("bobbobbobbobbobb")
    }
    fn carol() -> PeerId {
        peer("carolcarolcarolc")
    }

    struct Fixture {
        trust: TrustManager,
        store: Arc<MemoryStore>,
        keyring: Arc<LocalKeyring>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let keyring = Arc::new(LocalKeyring::from_seed([1; 32]));
        let mut own = ContactProfile::new(me(), ContactStatus::Myself, "Me");
        own.key_id = Some(keyring.own_key_id());
        store.add_or_update_profile(own).unwrap();
        let ctx = NodeContext::new(store.clone(), keyring.clone(), ProtocolConfig::default());
        let engine = Arc::new(DeliveryEngine::new(ctx, Arc::new(MockTransport::new())));
        Fixture {
            trust: TrustManager::new(engine),
            store,
            keyring,
        }
    }

    fn add_contact(f: &Fixture, id: PeerId, status: ContactStatus, seed: u8) {
        let mut p = ContactProfile::new(id, status, "friend");
        p.key_id = f
            .keyring
            .import_public_key(&LocalKeyring::from_seed([seed; 32]).export_public_key());
        f.store.add_or_update_profile(p).unwrap();
    }

    fn outbox_types(f: &Fixture) -> Vec<MessageType> {
        f.store.get_outbox().unwrap().into_iter().map(|r| r.msg_type).collect()
    }

    #[test]
    fn initiate_sets_requested_and_queues_request() {
        let f = fixture();
        f.trust.initiate(&bob(), "Bob", "hi", false).unwrap();
        let p = f.store.get_profile(&bob()).unwrap().unwrap();
        assert_eq!(p.status, ContactStatus::Requested);
        assert_eq!(outbox_types(&f), vec![MessageType::ContactRequest]);
    }

    #[test]
    fn initiate_rejects_self_and_trusted_without_changes() {
        let f = fixture();
        add_contact(&f, bob(), ContactStatus::Trusted, 2);
        let before = f.store.get_profile(&bob()).unwrap();
        let own_before = f.store.own_profile().unwrap();

        assert!(matches!(
            f.trust.initiate(&me(), "me", "hi", false),
            Err(ProtocolError::ContactRejected { .. })
        ));
        assert!(matches!(
            f.trust.initiate(&bob(), "Bob", "hi", false),
            Err(ProtocolError::ContactRejected { .. })
        ));
        assert_eq!(f.store.get_profile(&bob()).unwrap(), before);
        assert_eq!(f.store.own_profile().unwrap(), own_before);
        assert!(f.store.get_outbox().unwrap().is_empty());
    }

    #[test]
    fn initiate_allowed_after_delete() {
        let f = fixture();
        add_contact(&f, bob(), ContactStatus::Deleted, 2);
        f.trust.initiate(&bob(), "", "again", false).unwrap();
        let p = f.store.get_profile(&bob()).unwrap().unwrap();
        assert_eq!(p.status, ContactStatus::Requested);
        assert_eq!(p.display_name, "friend");
    }

    #[test]
    fn robot_request_records_robot() {
        let f = fixture();
        f.trust.initiate(&bob(), "my bot", "", true).unwrap();
        assert_eq!(f.store.get_profile(&bob()).unwrap().unwrap().status, ContactStatus::Reqrobot);
        assert_eq!(f.store.own_profile().unwrap().unwrap().robot, Some(bob()));
    }

    #[test]
    fn accept_from_inbox_imports_key_and_replies() {
        let f = fixture();
        let bob_keys = LocalKeyring::from_seed([2; 32]);
        let mut row = InboxRow::new(MessageType::ContactRequest, bob(), "let's talk", 60);
        row.from_name = "Bob".into();
        row.public_key = Some(bob_keys.export_public_key());
        f.store.add_row_to_inbox(row).unwrap();

        f.trust.accept(&bob(), "sure").unwrap();
        let p = f.store.get_profile(&bob()).unwrap().unwrap();
        assert_eq!(p.status, ContactStatus::Untrusted);
        assert_eq!(p.key_id, Some(bob_keys.own_key_id()));
        assert!(f.store.get_inbox().unwrap().is_empty());
        assert_eq!(outbox_types(&f), vec![MessageType::ContactAccept]);
    }

    #[test]
    fn accept_without_request_fails() {
        let f = fixture();
        assert!(matches!(
            f.trust.accept(&bob(), ""),
            Err(ProtocolError::UnknownContact(_))
        ));
    }

    #[test]
    fn deny_leaves_own_view_untouched() {
        let f = fixture();
        f.store
            .add_row_to_inbox(InboxRow::new(MessageType::ContactRequest, bob(), "hi", 60))
            .unwrap();
        f.trust.deny(&bob()).unwrap();
        assert!(f.store.get_inbox().unwrap().is_empty());
        assert_eq!(f.store.get_profile(&bob()).unwrap(), None);
        let rows = f.store.get_outbox().unwrap();
        assert_eq!(rows[0].msg_type, MessageType::ContactDeny);
        assert_eq!(rows[0].recipient, Recipient::Single(bob()));
    }

    #[test]
    fn receive_accept_transitions() {
        let f = fixture();
        let bob_keys = LocalKeyring::from_seed([2; 32]);
        f.trust.initiate(&bob(), "Bob", "hi", false).unwrap();
        let result = f
            .trust
            .receive_accept(&bob(), "Bobby", &bob_keys.export_public_key(), "ok")
            .unwrap();
        assert_eq!(result, AcceptResult::Accepted(ContactStatus::Untrusted));
        let p = f.store.get_profile(&bob()).unwrap().unwrap();
        assert_eq!(p.key_id, Some(bob_keys.own_key_id()));
        assert_eq!(p.display_name, "Bob");
        assert_eq!(p.name, "Bobby");
    }

    #[test]
    fn receive_accept_from_robot() {
        let f = fixture();
        add_contact(&f, carol(), ContactStatus::Trusted, 3);
        f.trust.initiate(&bob(), "bot", "", true).unwrap();
        let bot_keys = LocalKeyring::from_seed([2; 32]);
        let result = f
            .trust
            .receive_accept(&bob(), "bot", &bot_keys.export_public_key(), "")
            .unwrap();
        assert_eq!(result, AcceptResult::Accepted(ContactStatus::Robot));
        // Robot announced to carol.
        assert_eq!(
            outbox_types(&f),
            vec![MessageType::ContactRequest, MessageType::ContactReferral]
        );
    }

    #[test]
    fn unsolicited_accept_is_parked() {
        let f = fixture();
        let result = f
            .trust
            .receive_accept(&bob(), "Bob", &LocalKeyring::from_seed([2; 32]).export_public_key(), "hi")
            .unwrap();
        assert_eq!(result, AcceptResult::Pending);
        assert_eq!(f.store.pending_contacts().unwrap().len(), 1);
        assert_eq!(f.store.get_profile(&bob()).unwrap(), None);
    }

    #[test]
    fn receive_deny_deletes_request() {
        let f = fixture();
        f.trust.initiate(&bob(), "Bob", "hi", false).unwrap();
        f.trust.receive_deny(&bob()).unwrap();
        assert_eq!(f.store.get_profile(&bob()).unwrap().unwrap().status, ContactStatus::Deleted);

        add_contact(&f, carol(), ContactStatus::Trusted, 3);
        f.trust.receive_deny(&carol()).unwrap();
        assert_eq!(f.store.get_profile(&carol()).unwrap().unwrap().status, ContactStatus::Trusted);
    }

    #[test]
    fn trust_upgrade_only_from_untrusted() {
        let f = fixture();
        add_contact(&f, bob(), ContactStatus::Untrusted, 2);
        f.trust.set_trusted(&bob()).unwrap();
        assert!(f.trust.set_trusted(&bob()).is_err());
        assert!(f.trust.set_trusted(&carol()).is_err());
        f.trust.block(&carol()).unwrap();
        assert_eq!(f.store.get_profile(&carol()).unwrap().unwrap().status, ContactStatus::Blocked);
    }

    #[test]
    fn shared_contacts_partition() {
        let f = fixture();
        let dave = peer("davedavedavedave");
        let erin = peer("erinerinerinerin");
        add_contact(&f, bob(), ContactStatus::Trusted, 2);
        add_contact(&f, carol(), ContactStatus::Trusted, 3);
        add_contact(&f, dave.clone(), ContactStatus::Untrusted, 4);
        let mut b = f.store.get_profile(&bob()).unwrap().unwrap();
        b.contact_list = encode_contact_list(&[
            (carol(), "Carol".into()),
            (erin.clone(), "Erin".into()),
            (me(), "Me".into()),
        ]);
        f.store.add_or_update_profile(b.clone()).unwrap();

        let shared = f.trust.get_shared_possible_contacts(&bob()).unwrap();
        assert_eq!(shared.shared, BTreeSet::from([carol()]));
        assert!(shared.suggest_to_them.is_empty());
        assert_eq!(shared.suggest_to_me, BTreeSet::from([erin.clone()]));
        assert_eq!(shared.names.get(&erin).map(String::as_str), Some("Erin"));

        // An untrusted candidate only learns what is shared.
        b.status = ContactStatus::Untrusted;
        f.store.add_or_update_profile(b).unwrap();
        let shared = f.trust.get_shared_possible_contacts(&bob()).unwrap();
        assert_eq!(shared.shared, BTreeSet::from([carol()]));
        assert!(shared.suggest_to_me.is_empty());
        assert!(!shared.names.contains_key(&erin));
    }

    #[test]
    fn shared_contacts_suggests_trusted_only() {
        let f = fixture();
        let dave = peer("davedavedavedave");
        add_contact(&f, bob(), ContactStatus::Trusted, 2);
        add_contact(&f, carol(), ContactStatus::Trusted, 3);
        add_contact(&f, dave, ContactStatus::Untrusted, 4);
        let shared = f.trust.get_shared_possible_contacts(&bob()).unwrap();
        assert_eq!(shared.suggest_to_them, BTreeSet::from([carol()]));
    }

    #[test]
    fn referral_needs_trusted_target() {
        let f = fixture();
        add_contact(&f, bob(), ContactStatus::Untrusted, 2);
        add_contact(&f, carol(), ContactStatus::Trusted, 3);
        assert!(f.trust.send_referral(&bob(), &carol(), "meet").is_err());
        f.trust.send_referral(&carol(), &bob(), "meet").unwrap();
        f.trust.send_refer_request(&carol(), &bob(), "please").unwrap();
        assert_eq!(
            outbox_types(&f),
            vec![MessageType::ContactReferral, MessageType::ContactReferRequest]
        );
    }

    #[test]
    fn public_profile_respects_friends_setting() {
        let f = fixture();
        add_contact(&f, bob(), ContactStatus::Trusted, 2);
        let public = f.trust.public_profile().unwrap();
        assert_eq!(decode_contact_list(&public.contact_list).len(), 1);
    }

    #[test]
    fn remove_robot_notifies_and_deletes() {
        let f = fixture();
        add_contact(&f, carol(), ContactStatus::Trusted, 3);
        add_contact(&f, bob(), ContactStatus::Robot, 2);
        let mut own = f.store.own_profile().unwrap().unwrap();
        own.robot = Some(bob());
        f.store.add_or_update_profile(own).unwrap();

        f.trust.remove_robot().unwrap();
        assert_eq!(f.store.own_profile().unwrap().unwrap().robot, None);
        assert_eq!(f.store.get_profile(&bob()).unwrap().unwrap().status, ContactStatus::Deleted);
        assert_eq!(outbox_types(&f), vec![MessageType::ContactReferral]);
    }
}
