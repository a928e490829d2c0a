//! Outbox delivery engine.
//!
//! Messages are encoded once per recipient and parked in the outbox. A
//! flush drains it in two passes: first to contacts believed online, then
//! to everyone else. Queued messages that cannot be delivered directly are
//! signed once and handed to relay contacts; the row stays until the
//! recipient can be reached.

use std::collections::HashSet;
use std::sync::Arc;

use murmeli_metrics::{DeliveryMetrics, DeliverySnapshot};
use murmeli_transport::PeerId;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::codec::{self, now_secs};
use crate::context::NodeContext;
use crate::gateway::{IdentityGateway, KeyringEncrypter};
use crate::message::{EncType, Message, MessageType};
use crate::profile::{decode_contact_list, ContactStatus};
use crate::relay_cache::RelayCache;
use crate::store::{OutboxRow, Recipient};
use crate::transport::Transport;
use crate::ProtocolError;

/// What happened to one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Recipient deleted or blocked: drop for good.
    Ignored,
    /// Nothing sendable: drop for good.
    Invalid,
    /// Transport failure: retry later.
    Failed,
}

/// Result of one [`DeliveryEngine::flush`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush held the outbox lock for too long.
    Skipped,
    Completed {
        /// Recipients that failed during this flush, now marked offline.
        failed: Vec<PeerId>,
        /// Rows left in the outbox afterwards.
        remaining: usize,
    },
}

#[derive(PartialEq, Eq)]
enum Pass {
    OnlineOnly,
    Everyone,
}

#[derive(Default)]
struct FlushState {
    failed: HashSet<PeerId>,
    sends: usize,
}

pub struct DeliveryEngine {
    ctx: NodeContext,
    transport: Arc<dyn Transport>,
    flush_lock: Mutex<()>,
    flush_requested: Notify,
    relay_cache: RelayCache,
    metrics: DeliveryMetrics,
}

impl DeliveryEngine {
    pub fn new(ctx: NodeContext, transport: Arc<dyn Transport>) -> Self {
        let relay_cache = RelayCache::new(ctx.config.relay_cache_ttl);
        Self {
            ctx,
            transport,
            flush_lock: Mutex::new(()),
            flush_requested: Notify::new(),
            relay_cache,
            metrics: DeliveryMetrics::new(),
        }
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn metrics(&self) -> DeliverySnapshot {
        self.metrics.snapshot()
    }

    // ── Enqueue ───────────────────────────────────────────────────────

    /// Encode `msg` for each of its recipients and queue the frames.
    ///
    /// Fails without queuing anything if the message is incomplete or a
    /// recipient has no usable key.
    pub fn enqueue(&self, mut msg: Message) -> Result<Vec<u64>, ProtocolError> {
        msg.ensure_complete()?;
        if msg.recipients.is_empty() {
            return Ok(Vec::new());
        }
        msg.sender_id = Some(self.ctx.own_id()?);
        if msg.timestamp.is_none() {
            msg.timestamp = Some(now_secs());
        }

        let mut rows = Vec::with_capacity(msg.recipients.len());
        for recipient in &msg.recipients {
            let frame = self.encode_for(&msg, recipient)?;
            let mut row = OutboxRow::new(
                Recipient::Single(recipient.clone()),
                frame,
                msg.enc_type,
                msg.msg_type,
            );
            row.queue = msg.should_be_queued;
            if msg.should_be_relayed {
                row.relays = self.relay_candidates(recipient)?;
            }
            rows.push(row);
        }

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(self.ctx.store.add_row_to_outbox(row)?);
        }
        tracing::debug!(msg_type = %msg.msg_type, rows = ids.len(), "queued");
        self.request_flush();
        Ok(ids)
    }

    /// Send `msg` to every contact whose status is in `statuses`.
    pub fn broadcast(&self, mut msg: Message, statuses: &[ContactStatus]) -> Result<Vec<u64>, ProtocolError> {
        msg.recipients = self
            .ctx
            .store
            .get_profiles_with_status(statuses)?
            .into_iter()
            .map(|p| p.tor_id)
            .collect();
        self.enqueue(msg)
    }

    fn encode_for(&self, msg: &Message, recipient: &PeerId) -> Result<Vec<u8>, ProtocolError> {
        match msg.enc_type {
            EncType::Asymmetric => {
                let key_id = self
                    .ctx
                    .store
                    .get_profile(recipient)?
                    .and_then(|p| p.key_id)
                    .ok_or_else(|| ProtocolError::Crypto(format!("no key for {recipient}")))?;
                codec::encode(msg, &KeyringEncrypter::new(self.ctx.keyring.as_ref(), &key_id))
            }
            EncType::None | EncType::Relay => codec::encode(msg, &IdentityGateway),
        }
    }

    /// Trusted contacts who can pass a message on to `recipient`.
    ///
    /// Prefers friends the recipient lists as their own; with no list,
    /// every trusted contact.
    pub fn relay_candidates(&self, recipient: &PeerId) -> Result<Vec<PeerId>, ProtocolError> {
        let own_id = self.ctx.own_id()?;
        let trusted: Vec<PeerId> = self
            .ctx
            .store
            .get_profiles_with_status(&[ContactStatus::Trusted])?
            .into_iter()
            .map(|p| p.tor_id)
            .filter(|id| id != recipient && *id != own_id)
            .collect();

        let their_friends: HashSet<PeerId> = self
            .ctx
            .store
            .get_profile(recipient)?
            .map(|p| decode_contact_list(&p.contact_list))
            .unwrap_or_default()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        if their_friends.is_empty() {
            return Ok(trusted);
        }
        Ok(trusted
            .into_iter()
            .filter(|id| their_friends.contains(id))
            .collect())
    }

    /// Forward an opaque parcel to our trusted contacts, except the
    /// contact it came from. Each parcel is forwarded at most once per TTL.
    pub fn relay_fan_out(&self, parcel: &[u8], exclude: &PeerId) -> Result<Option<u64>, ProtocolError> {
        if !self.relay_cache.first_sighting(parcel) {
            tracing::debug!(from = %exclude, "parcel already relayed");
            return Ok(None);
        }
        let own_id = self.ctx.own_id()?;
        let targets: Vec<PeerId> = self
            .ctx
            .store
            .get_profiles_with_status(&[ContactStatus::Trusted])?
            .into_iter()
            .map(|p| p.tor_id)
            .filter(|id| id != exclude && *id != own_id)
            .collect();
        if targets.is_empty() {
            return Ok(None);
        }

        let frame = self.signed_relay_frame(parcel)?;
        let row = OutboxRow::new(Recipient::List(targets), frame, EncType::Relay, MessageType::Relay);
        let id = self.ctx.store.add_row_to_outbox(row)?;
        self.metrics.relayed_for_others.inc();
        self.request_flush();
        Ok(Some(id))
    }

    fn signed_relay_frame(&self, frame: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let signed = self.ctx.keyring.sign_data(frame)?;
        codec::encode(&Message::relay(signed), &IdentityGateway)
    }

    // ── Flush ─────────────────────────────────────────────────────────

    /// Ask the worker for a flush as soon as possible.
    pub fn request_flush(&self) {
        self.flush_requested.notify_one();
    }

    /// Drain the outbox once.
    ///
    /// Skipped if another flush holds the lock past the configured timeout.
    pub async fn flush(&self) -> FlushOutcome {
        let lock = tokio::time::timeout(self.ctx.config.flush_lock_timeout, self.flush_lock.lock()).await;
        let Ok(_guard) = lock else {
            tracing::debug!("flush skipped, outbox busy");
            self.metrics.flushes_skipped.inc();
            return FlushOutcome::Skipped;
        };

        let mut state = FlushState::default();
        for pass in [Pass::OnlineOnly, Pass::Everyone] {
            if let Err(e) = self.run_pass(&pass, &mut state).await {
                tracing::warn!("flush pass aborted: {e}");
            }
        }

        let mut failed: Vec<PeerId> = state.failed.into_iter().collect();
        failed.sort();
        for peer in &failed {
            self.ctx.online.set_offline(peer);
        }
        self.metrics.flushes.inc();
        let remaining = self.ctx.store.get_outbox().map(|rows| rows.len()).unwrap_or(0);
        FlushOutcome::Completed { failed, remaining }
    }

    async fn run_pass(&self, pass: &Pass, state: &mut FlushState) -> Result<(), ProtocolError> {
        for row in self.ctx.store.get_outbox()? {
            match row.recipient.clone() {
                Recipient::Single(target) => self.deliver_single(row, &target, pass, state).await?,
                Recipient::List(targets) => self.deliver_list(row, targets, pass, state).await?,
            }
        }
        Ok(())
    }

    fn should_try(&self, peer: &PeerId, pass: &Pass, state: &FlushState) -> bool {
        if state.failed.contains(peer) {
            return false;
        }
        *pass == Pass::Everyone || self.ctx.online.is_online(peer)
    }

    async fn deliver_single(
        &self,
        mut row: OutboxRow,
        target: &PeerId,
        pass: &Pass,
        state: &mut FlushState,
    ) -> Result<(), ProtocolError> {
        if state.failed.contains(target) {
            // No second direct attempt this flush, but the relays still get a go.
            if row.queue && !row.relays.is_empty() {
                self.try_relays(&mut row, pass, state).await?;
            }
            return Ok(());
        }
        if !self.should_try(target, pass, state) {
            return Ok(());
        }
        match self.send(target, &row.message, row.msg_type, state).await? {
            SendOutcome::Delivered => {
                self.metrics.direct_sends.inc();
                self.ctx.store.delete_from_outbox(row.id)?;
            }
            SendOutcome::Ignored | SendOutcome::Invalid => {
                self.metrics.dropped.inc();
                self.ctx.store.delete_from_outbox(row.id)?;
            }
            SendOutcome::Failed if !row.queue => {
                self.metrics.dropped.inc();
                self.ctx.store.delete_from_outbox(row.id)?;
            }
            SendOutcome::Failed => {
                if !row.relays.is_empty() {
                    self.try_relays(&mut row, pass, state).await?;
                }
            }
        }
        Ok(())
    }

    async fn try_relays(
        &self,
        row: &mut OutboxRow,
        pass: &Pass,
        state: &mut FlushState,
    ) -> Result<(), ProtocolError> {
        let relay_frame = match &row.relay_message {
            Some(frame) => frame.clone(),
            None => {
                let frame = self.signed_relay_frame(&row.message)?;
                row.relay_message = Some(frame.clone());
                self.ctx.store.update_outbox_row(row)?;
                frame
            }
        };

        let mut still_to_try = Vec::with_capacity(row.relays.len());
        for relay in std::mem::take(&mut row.relays) {
            if !self.should_try(&relay, pass, state) {
                still_to_try.push(relay);
                continue;
            }
            match self.send(&relay, &relay_frame, MessageType::Relay, state).await? {
                SendOutcome::Delivered => {
                    tracing::debug!(relay = %relay, row = row.id, "handed to relay");
                    self.metrics.relay_sends.inc();
                }
                SendOutcome::Ignored | SendOutcome::Invalid => {}
                SendOutcome::Failed => still_to_try.push(relay),
            }
        }
        row.relays = still_to_try;
        self.ctx.store.update_outbox_row(row)?;
        Ok(())
    }

    async fn deliver_list(
        &self,
        mut row: OutboxRow,
        targets: Vec<PeerId>,
        pass: &Pass,
        state: &mut FlushState,
    ) -> Result<(), ProtocolError> {
        let before = targets.len();
        let mut remaining = Vec::with_capacity(targets.len());
        for target in targets {
            if !self.should_try(&target, pass, state) {
                remaining.push(target);
                continue;
            }
            match self.send(&target, &row.message, row.msg_type, state).await? {
                SendOutcome::Delivered => self.metrics.relay_sends.inc(),
                SendOutcome::Ignored | SendOutcome::Invalid => self.metrics.dropped.inc(),
                SendOutcome::Failed => remaining.push(target),
            }
        }

        if remaining.is_empty() {
            self.ctx.store.delete_from_outbox(row.id)?;
        } else if remaining.len() != before {
            row.recipient = Recipient::List(remaining);
            self.ctx.store.update_outbox_row(&row)?;
        }
        Ok(())
    }

    /// One attempt, with the inter-send delay and outcome bookkeeping.
    async fn send(
        &self,
        target: &PeerId,
        frame: &[u8],
        msg_type: MessageType,
        state: &mut FlushState,
    ) -> Result<SendOutcome, ProtocolError> {
        if frame.is_empty() {
            return Ok(SendOutcome::Invalid);
        }
        let exempt = matches!(msg_type, MessageType::ContactRequest | MessageType::ContactDeny);
        if !exempt {
            if let Some(profile) = self.ctx.store.get_profile(target)? {
                if matches!(profile.status, ContactStatus::Deleted | ContactStatus::Blocked) {
                    tracing::debug!(peer = %target, status = %profile.status, "dropping message");
                    return Ok(SendOutcome::Ignored);
                }
            }
        }

        if state.sends > 0 && !self.ctx.config.send_delay.is_zero() {
            tokio::time::sleep(self.ctx.config.send_delay).await;
        }
        state.sends += 1;

        match self.transport.send_frame(target, frame).await {
            Ok(()) => {
                self.ctx.online.set_online(target);
                Ok(SendOutcome::Delivered)
            }
            Err(e) => {
                tracing::warn!(peer = %target, "send failed: {e}");
                self.metrics.failures.inc();
                state.failed.insert(target.clone());
                Ok(SendOutcome::Failed)
            }
        }
    }

    // ── Worker ────────────────────────────────────────────────────────

    /// Start the periodic flush task.
    pub fn spawn_worker(self: &Arc<Self>) -> DeliveryWorker {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.ctx.config.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = engine.flush_requested.notified() => {}
                    _ = stop_rx.changed() => break,
                }
                engine.flush().await;
            }
            tracing::debug!("delivery worker stopped");
        });
        DeliveryWorker { stop_tx, task }
    }
}

/// Handle to the periodic flush task.
pub struct DeliveryWorker {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DeliveryWorker {
    /// Stop the timer. A flush already running is allowed to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}
