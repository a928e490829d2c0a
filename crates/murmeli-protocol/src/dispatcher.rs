//! Routing of decoded inbound messages.
//!
//! Messages whose type requires a trusted sender are dropped unless the
//! sender's status is in the dispatcher's gate set and the signature came
//! from the key we hold for them.

use std::sync::Arc;

use murmeli_transport::PeerId;

use crate::codec::now_secs;
use crate::config::DispatcherKind;
use crate::contacts::{AcceptResult, TrustManager};
use crate::context::NodeContext;
use crate::delivery::DeliveryEngine;
use crate::message::{field, EncType, Message, MessageType, ReferralType};
use crate::profile::{ContactProfile, ContactStatus, PublicProfile};
use crate::store::InboxRow;
use crate::ProtocolError;

/// Prefix of a parrot command to pass the rest of a message on.
pub const FORWARD_PREFIX: &str = "fwd:";

/// What [`Dispatcher::receive`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Acted on, nothing stored.
    Handled,
    /// Stored in the inbox under this row id.
    Stored(u64),
    /// Already in the inbox.
    Duplicate,
    Dropped(&'static str),
}

pub struct Dispatcher {
    ctx: NodeContext,
    engine: Arc<DeliveryEngine>,
    trust: Arc<TrustManager>,
    kind: DispatcherKind,
}

impl Dispatcher {
    pub fn new(engine: Arc<DeliveryEngine>, trust: Arc<TrustManager>) -> Self {
        let ctx = engine.context().clone();
        let kind = ctx.config.dispatcher;
        Self {
            ctx,
            engine,
            trust,
            kind,
        }
    }

    pub fn kind(&self) -> DispatcherKind {
        self.kind
    }

    /// Statuses allowed to send messages that require trust.
    fn gate(&self) -> &'static [ContactStatus] {
        match self.kind {
            DispatcherKind::Regular => &[
                ContactStatus::Trusted,
                ContactStatus::Untrusted,
                ContactStatus::Robot,
            ],
            DispatcherKind::Robot => &[ContactStatus::Owner],
            DispatcherKind::Parrot => &[
                ContactStatus::Trusted,
                ContactStatus::Untrusted,
                ContactStatus::Owner,
            ],
        }
    }

    /// Statuses whose regular messages we take.
    fn may_message(&self) -> &'static [ContactStatus] {
        match self.kind {
            DispatcherKind::Regular => &[ContactStatus::Trusted, ContactStatus::Untrusted],
            DispatcherKind::Robot => &[ContactStatus::Owner],
            DispatcherKind::Parrot => &[
                ContactStatus::Trusted,
                ContactStatus::Untrusted,
                ContactStatus::Owner,
            ],
        }
    }

    /// Route one decoded message.
    pub fn receive(&self, msg: Message) -> Result<Disposition, ProtocolError> {
        if msg.msg_type == MessageType::Relay {
            return self.handle_relay(msg);
        }
        let Some(sender) = msg.sender_id.clone() else {
            return Ok(self.drop_msg(&msg, "no sender id"));
        };
        let profile = self.ctx.store.get_profile(&sender)?;

        if msg.sender_must_be_trusted {
            let Some(profile) = profile.as_ref().filter(|p| self.passes_gate(p, &msg)) else {
                tracing::warn!(peer = %sender, msg_type = %msg.msg_type, "untrusted sender");
                return Ok(Disposition::Dropped("untrusted sender"));
            };
            return self.handle_trusted(msg, profile.clone());
        }

        if profile.as_ref().map(|p| p.status) == Some(ContactStatus::Blocked) {
            return Ok(self.drop_msg(&msg, "blocked sender"));
        }
        match msg.msg_type {
            MessageType::ContactRequest => self.handle_request(&msg, &sender, profile),
            MessageType::ContactAccept => self.handle_accept(&msg, &sender),
            MessageType::ContactDeny => {
                self.trust.receive_deny(&sender)?;
                Ok(Disposition::Handled)
            }
            MessageType::Regular => self.handle_regular(&msg, &sender, profile),
            _ => Ok(self.drop_msg(&msg, "unexpected ungated message")),
        }
    }

    fn passes_gate(&self, profile: &ContactProfile, msg: &Message) -> bool {
        if !self.gate().contains(&profile.status) {
            return false;
        }
        msg.enc_type != EncType::Asymmetric
            || (msg.signature_key_id.is_some() && msg.signature_key_id == profile.key_id)
    }

    fn drop_msg(&self, msg: &Message, reason: &'static str) -> Disposition {
        tracing::debug!(msg_type = %msg.msg_type, reason, "message dropped");
        Disposition::Dropped(reason)
    }

    fn handle_trusted(&self, msg: Message, profile: ContactProfile) -> Result<Disposition, ProtocolError> {
        match msg.msg_type {
            MessageType::StatusNotify => self.handle_status(&msg, &profile),
            MessageType::InfoRequest => {
                let public = self.trust.public_profile()?;
                let json = serde_json::to_string(&public)
                    .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
                self.engine
                    .enqueue(Message::info_response(&json, &public.hash()).to(profile.tor_id))?;
                Ok(Disposition::Handled)
            }
            MessageType::InfoResponse => self.handle_info_response(&msg, profile),
            MessageType::ContactReferral => self.handle_referral(&msg, profile),
            MessageType::ContactReferRequest => self.handle_refer_request(&msg, &profile),
            _ => Ok(self.drop_msg(&msg, "unexpected gated message")),
        }
    }

    // ── Status ────────────────────────────────────────────────────────

    fn handle_status(&self, msg: &Message, profile: &ContactProfile) -> Result<Disposition, ProtocolError> {
        let sender = &profile.tor_id;
        let online = msg.field_bool(field::ONLINE).unwrap_or(false);
        let ping = msg.field_bool(field::PING).unwrap_or(false);

        if !online {
            self.ctx.online.set_offline(sender);
            return Ok(Disposition::Handled);
        }
        self.ctx
            .online
            .set_online_at(sender, msg.timestamp.unwrap_or_else(now_secs));
        self.engine.request_flush();

        let answers_ping = profile.status != ContactStatus::Untrusted;
        if ping && answers_ping {
            let hash = self.trust.public_profile()?.hash();
            let pong = Message::status_notify(true, false)
                .with_field(field::PROFILE_HASH, hash)
                .to(sender.clone());
            self.engine.enqueue(pong)?;
        }

        if self.kind == DispatcherKind::Regular && profile.status == ContactStatus::Trusted {
            if let Some(hash) = msg.field_str(field::PROFILE_HASH) {
                if profile.profile_hash.as_deref() != Some(hash) {
                    tracing::debug!(peer = %sender, "profile changed, asking for it");
                    self.engine.enqueue(Message::info_request().to(sender.clone()))?;
                }
            }
        }
        Ok(Disposition::Handled)
    }

    // ── Contact requests and answers ──────────────────────────────────

    fn handle_request(
        &self,
        msg: &Message,
        sender: &PeerId,
        profile: Option<ContactProfile>,
    ) -> Result<Disposition, ProtocolError> {
        let name = msg.field_str(field::SENDER_NAME).unwrap_or_default();
        let intro = msg.field_str(field::MESSAGE).unwrap_or_default();
        let public_key = msg.field_str(field::PUBLIC_KEY);
        let key_id = msg.field_str(field::KEY_ID);
        let status = profile.as_ref().map(|p| p.status);

        match self.kind {
            DispatcherKind::Robot => {
                let expected = self.ctx.config.robot_owner_key_id.as_deref();
                if key_id.is_none() || key_id != expected {
                    return Ok(self.drop_msg(msg, "not our owner"));
                }
                self.trust
                    .accept_request(sender, name, None, key_id, ContactStatus::Owner, "")?;
                Ok(Disposition::Handled)
            }
            DispatcherKind::Parrot => {
                if !matches!(status, None | Some(ContactStatus::Deleted)) {
                    return Ok(self.drop_msg(msg, "already known"));
                }
                self.trust.accept_request(
                    sender,
                    name,
                    public_key,
                    key_id,
                    ContactStatus::Untrusted,
                    "squawk",
                )?;
                Ok(Disposition::Handled)
            }
            DispatcherKind::Regular => {
                let Some(public_key) = public_key else {
                    return Ok(self.drop_msg(msg, "request without public key"));
                };
                if status == Some(ContactStatus::Requested) {
                    tracing::info!(peer = %sender, "mutual request, accepting");
                    self.trust.accept_request(
                        sender,
                        name,
                        Some(public_key),
                        None,
                        ContactStatus::Untrusted,
                        "",
                    )?;
                    return Ok(Disposition::Handled);
                }
                if !self.ctx.config.allow_unsolicited_requests {
                    return Ok(self.drop_msg(msg, "unsolicited requests disabled"));
                }
                let mut row = InboxRow::new(
                    MessageType::ContactRequest,
                    sender.clone(),
                    intro,
                    msg.timestamp.unwrap_or_else(now_secs),
                );
                row.from_name = name.to_string();
                row.public_key = Some(public_key.to_string());
                row.key_id = key_id.map(str::to_string);
                self.store_row(row)
            }
        }
    }

    fn handle_accept(&self, msg: &Message, sender: &PeerId) -> Result<Disposition, ProtocolError> {
        let Some(public_key) = msg.field_str(field::PUBLIC_KEY) else {
            return Ok(self.drop_msg(msg, "accept without public key"));
        };
        let name = msg.field_str(field::SENDER_NAME).unwrap_or_default();
        let intro = msg.field_str(field::MESSAGE).unwrap_or_default();
        match self.trust.receive_accept(sender, name, public_key, intro)? {
            AcceptResult::Accepted(_) => Ok(Disposition::Handled),
            AcceptResult::Pending => Ok(Disposition::Dropped("no matching request")),
        }
    }

    // ── Profiles ──────────────────────────────────────────────────────

    fn handle_info_response(
        &self,
        msg: &Message,
        mut profile: ContactProfile,
    ) -> Result<Disposition, ProtocolError> {
        let Some(json) = msg.field_str(field::PROFILE) else {
            return Ok(self.drop_msg(msg, "empty profile"));
        };
        let public: PublicProfile = match serde_json::from_str(json) {
            Ok(p) => p,
            Err(_) => return Ok(self.drop_msg(msg, "unreadable profile")),
        };
        profile.name = public.name.clone();
        profile.description = public.description.clone();
        profile.contact_list = public.contact_list.clone();
        profile.robot = public.robot.parse().ok();
        profile.profile_hash = Some(
            msg.field_str(field::PROFILE_HASH)
                .map(str::to_string)
                .unwrap_or_else(|| public.hash()),
        );
        if profile.display_name.is_empty() {
            profile.display_name = public.name;
        }
        tracing::debug!(peer = %profile.tor_id, "profile updated");
        self.ctx.store.add_or_update_profile(profile)?;
        Ok(Disposition::Handled)
    }

    // ── Referrals ─────────────────────────────────────────────────────

    fn referred_friend(&self, msg: &Message) -> Option<PeerId> {
        msg.field_str(field::FRIEND_ID)?.parse().ok()
    }

    fn handle_referral(&self, msg: &Message, mut sender: ContactProfile) -> Result<Disposition, ProtocolError> {
        let Some(friend) = self.referred_friend(msg) else {
            return Ok(self.drop_msg(msg, "bad friend id"));
        };
        let kind = msg
            .field_str(field::REFERRAL_TYPE)
            .and_then(ReferralType::parse)
            .unwrap_or(ReferralType::Normal);

        match kind {
            ReferralType::Robot => {
                sender.robot = Some(friend);
                self.ctx.store.add_or_update_profile(sender)?;
                Ok(Disposition::Handled)
            }
            ReferralType::RemoveRobot => {
                if sender.robot.as_ref() == Some(&friend) {
                    sender.robot = None;
                    self.ctx.store.add_or_update_profile(sender)?;
                }
                Ok(Disposition::Handled)
            }
            ReferralType::Normal => {
                if friend == self.ctx.own_id()? {
                    return Ok(self.drop_msg(msg, "referred to ourselves"));
                }
                let known = self.ctx.store.get_profile(&friend)?.map(|p| p.status);
                if !matches!(known, None | Some(ContactStatus::Deleted) | Some(ContactStatus::Requested)) {
                    return Ok(self.drop_msg(msg, "referred contact already known"));
                }
                let mut row = InboxRow::new(
                    MessageType::ContactReferral,
                    sender.tor_id.clone(),
                    msg.field_str(field::MESSAGE).unwrap_or_default(),
                    msg.timestamp.unwrap_or_else(now_secs),
                );
                row.from_name = sender.shown_name().to_string();
                row.friend_id = Some(friend);
                row.friend_name = msg.field_str(field::FRIEND_NAME).map(str::to_string);
                row.public_key = msg.field_str(field::PUBLIC_KEY).map(str::to_string);
                row.referral_type = Some(kind);
                self.store_row(row)
            }
        }
    }

    fn handle_refer_request(&self, msg: &Message, sender: &ContactProfile) -> Result<Disposition, ProtocolError> {
        let Some(friend) = self.referred_friend(msg) else {
            return Ok(self.drop_msg(msg, "bad friend id"));
        };
        let mut row = InboxRow::new(
            MessageType::ContactReferRequest,
            sender.tor_id.clone(),
            msg.field_str(field::MESSAGE).unwrap_or_default(),
            msg.timestamp.unwrap_or_else(now_secs),
        );
        row.from_name = sender.shown_name().to_string();
        row.friend_id = Some(friend);
        self.store_row(row)
    }

    // ── Regular messages ──────────────────────────────────────────────

    fn handle_regular(
        &self,
        msg: &Message,
        sender: &PeerId,
        profile: Option<ContactProfile>,
    ) -> Result<Disposition, ProtocolError> {
        let Some(profile) = profile.filter(|p| {
            self.may_message().contains(&p.status) && msg.signature_key_id.is_some() && msg.signature_key_id == p.key_id
        }) else {
            tracing::warn!(peer = %sender, "regular message from unknown or unverified sender");
            return Ok(Disposition::Dropped("sender may not message us"));
        };
        let body = msg.field_str(field::MESSAGE_BODY).unwrap_or_default();

        if self.kind == DispatcherKind::Parrot {
            return self.parrot(&profile, body);
        }

        let mut row = InboxRow::new(
            MessageType::Regular,
            sender.clone(),
            body,
            msg.timestamp.unwrap_or_else(now_secs),
        );
        if self.ctx.store.find_inbox_by_hash(&row.message_hash)?.is_some() {
            return Ok(Disposition::Duplicate);
        }
        row.from_name = profile.shown_name().to_string();
        row.recipients = msg
            .field_str(field::RECIPIENTS)
            .map(parse_recipients)
            .unwrap_or_default();
        row.parent_hash = msg.field_str(field::PARENT_HASH).map(str::to_string);
        let parent = match &row.parent_hash {
            Some(hash) => self.ctx.store.find_inbox_by_hash(hash)?,
            None => None,
        };
        row.conversation_id = match parent.and_then(|p| p.conversation_id) {
            Some(id) => Some(id),
            None => Some(self.ctx.store.new_conversation_id()?),
        };
        self.store_row(row)
    }

    /// Echo text back, or pass on an owner's `fwd:<id> text` command.
    fn parrot(&self, sender: &ContactProfile, body: &str) -> Result<Disposition, ProtocolError> {
        if sender.status == ContactStatus::Owner {
            if let Some((target, text)) = parse_forward(body) {
                let known = self
                    .ctx
                    .store
                    .get_profile(&target)?
                    .is_some_and(|p| p.status.is_messageable());
                if known {
                    self.engine.enqueue(Message::regular(text).to(target))?;
                    return Ok(Disposition::Handled);
                }
                tracing::debug!(target = %target, "forward target unknown");
            }
        }
        let own = self.ctx.own_profile()?;
        let echo = format!("{} ({}) heard: {body}", own.shown_name(), own.tor_id);
        self.engine
            .enqueue(Message::regular(&echo).to(sender.tor_id.clone()))?;
        Ok(Disposition::Handled)
    }

    // ── Relay ─────────────────────────────────────────────────────────

    fn handle_relay(&self, msg: Message) -> Result<Disposition, ProtocolError> {
        let relayer = match &msg.signature_key_id {
            Some(key_id) => self.ctx.store.find_profile_by_key_id(key_id)?,
            None => None,
        };
        let Some(relayer) = relayer.filter(|p| self.gate().contains(&p.status)) else {
            tracing::warn!("relay parcel from unknown signer");
            return Ok(Disposition::Dropped("untrusted relay signer"));
        };
        let Some(parcel) = msg.parcel else {
            return Ok(Disposition::Dropped("relay without parcel"));
        };
        self.engine.relay_fan_out(&parcel, &relayer.tor_id)?;
        Ok(Disposition::Handled)
    }

    fn store_row(&self, row: InboxRow) -> Result<Disposition, ProtocolError> {
        let from = row.from_id.clone();
        let msg_type = row.message_type;
        match self.ctx.store.add_row_to_inbox(row)? {
            Some(id) => {
                tracing::info!(peer = %from, %msg_type, "stored in inbox");
                Ok(Disposition::Stored(id))
            }
            None => Ok(Disposition::Duplicate),
        }
    }
}

/// Comma-separated peer ids; anything unparsable is skipped.
fn parse_recipients(s: &str) -> Vec<PeerId> {
    s.split(',').filter_map(|id| id.trim().parse().ok()).collect()
}

fn parse_forward(body: &str) -> Option<(PeerId, &str)> {
    let rest = body.strip_prefix(FORWARD_PREFIX)?;
    let (target, text) = rest.split_once(' ')?;
    Some((target.parse().ok()?, text.trim_start()))
}
