//! The protocol runner: executes Setup, Propose, Install, TakeAction,
//! Uninstall and Withdraw as initiator and answers them as responder.
//!
//! Every run is two messages. The initiator sends the parameters together
//! with its signature over the commitment, the responder recomputes the
//! commitment from its own copy of the channel, checks the signature, commits
//! and answers with its countersignature. The initiator commits once that
//! countersignature checks out. Both sides hold the channel lock for the
//! whole run and write the store exactly once, at the end.
//!
//! Both roles derive the state transition and commitment through the same
//! per-protocol `prepare` function, which keeps them from disagreeing about
//! what is being signed.
//!
//! The responder commits before it replies, so a lost reply leaves it one
//! step ahead. Retrying the same run gets the stored countersignature again.
//! A TakeAction on a version the responder has moved past is answered with
//! the app's latest state signed by both parties, which the initiator adopts.
//! Uninstall has no such answer: its signatures are not kept.

mod error;
mod install;
mod propose;
mod replay;
mod run;
mod setup;
mod take_action;
mod uninstall;
mod withdraw;

#[cfg(test)]
mod tests;

pub use error::ProtocolError;
pub use run::{Role, RunState};

use self::{
    replay::{Claim, ReplayCache},
    run::Run,
};
use crate::{
    abiencode::types::{Address, Hash, Signature},
    apps::AppRegistry,
    channel::{channel_id, AppInstance, PartIdx, StateChannel, Transition},
    commitment::{self, Commitment},
    config::{ConfigError, RunnerConfig},
    lock::{channel_lock_name, LockError, LockKey, LockService},
    messages::{
        InstallParams, Payload, ProposeParams, ProtocolMessage, ProtocolName, ProtocolParams,
        SetupParams, SignedAppState, TakeActionParams, UninstallParams, WithdrawParams,
        SEQ_PARAMS, SEQ_REPLY,
    },
    sig::{recover_signer, Signer},
    store::ChannelStore,
    wire::{decode_message, MessageBus},
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, info_span, warn, Instrument};

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolOutcome {
    /// The channel record as committed to the local store.
    pub channel: StateChannel,
    /// The app the run was about, if any. For Propose this is the identity
    /// hash of the new proposal.
    pub app_identity_hash: Option<Hash>,
}

/// Who plays which part in a run.
pub(crate) struct Roles<'a> {
    pub initiator: &'a str,
    pub responder: &'a str,
}

impl Roles<'_> {
    /// `[initiator, responder]` as indices into the channel's participants.
    fn indices(&self, channel: &StateChannel) -> Result<[PartIdx; 2], ProtocolError> {
        match (
            channel.index_of(self.initiator),
            channel.index_of(self.responder),
        ) {
            (Some(i), Some(r)) if i != r => Ok([i, r]),
            _ => Err(ProtocolError::InvalidParameters(format!(
                "{} and {} are not the participants of channel {}",
                self.initiator, self.responder, channel.id
            ))),
        }
    }
}

/// The validated outcome of a run before anything is written: the channel as
/// it is now, the transition to apply and what both parties sign.
pub(crate) struct Prepared {
    channel: StateChannel,
    transition: Transition,
    /// `None` for Propose, which is not signed.
    commitment: Option<Commitment>,
    app_identity_hash: Option<Hash>,
}

impl Prepared {
    /// `params` as sent to the counterparty. A proposal carries the sequence
    /// number it was prepared with.
    fn pin(&self, params: ProtocolParams) -> ProtocolParams {
        match (params, &self.transition) {
            (ProtocolParams::Propose(p), Transition::Propose(app)) => {
                ProtocolParams::Propose(ProposeParams {
                    app_seq_no: Some(app.app_seq_no),
                    ..p
                })
            }
            (params, _) => params,
        }
    }

    /// Writes the transition with one store call and reads the result back.
    /// `signatures` are in channel participant order.
    async fn commit<S>(
        self,
        store: &S,
        signatures: Option<[Signature; 2]>,
    ) -> Result<StateChannel, ProtocolError>
    where
        S: ChannelStore + ?Sized,
    {
        let id = self.channel.id;
        match self.transition {
            Transition::Setup => store.create_channel(self.channel).await?,
            Transition::Propose(app) => store.save_app_proposal(id, app).await?,
            Transition::RejectProposal(hash) => store.remove_app_proposal(id, hash).await?,
            Transition::Install { mut app, delta } => {
                app.latest_signatures = signatures;
                store.update_channel_with_app_instance(id, app, delta).await?
            }
            Transition::SetState(mut app) => {
                app.latest_signatures = signatures;
                store.update_app_instance(id, app).await?
            }
            Transition::Uninstall {
                app_identity_hash,
                delta,
            } => {
                store
                    .remove_app_instance(id, app_identity_hash, delta)
                    .await?
            }
            Transition::Withdraw { mut record, delta } => {
                record.signatures = signatures;
                store.save_withdrawal(id, record, delta).await?
            }
            Transition::SetCollateralization { asset, active } => {
                store.set_active_collateralization(id, asset, active).await?
            }
        }
        store
            .get_channel(id)
            .await?
            .ok_or(ProtocolError::ChannelNotFound(id))
    }
}

/// The app's latest state with both signatures, `None` for proposals.
fn signed_state(app: &AppInstance) -> Option<SignedAppState> {
    Some(SignedAppState {
        app_identity_hash: app.identity_hash,
        version: app.latest_version_number,
        state: app.latest_state.clone(),
        action: app.latest_action.clone(),
        signatures: app.latest_signatures?,
    })
}

/// An initiator waiting for the reply to one of its runs.
struct Pending {
    counterparty: String,
    reply: oneshot::Sender<ProtocolMessage>,
}

/// Drives protocol runs for one party.
///
/// Incoming messages are fed in through [ProtocolRunner::handle_message] or
/// [ProtocolRunner::spawn_listener], outgoing ones leave through `B`.
pub struct ProtocolRunner<S: ChannelStore, B: MessageBus> {
    identifier: String,
    signer: Signer,
    store: Arc<S>,
    bus: B,
    registry: Arc<AppRegistry>,
    config: RunnerConfig,
    locks: LockService,
    inflight: Mutex<HashMap<Hash, Pending>>,
    replay: Mutex<ReplayCache>,
}

impl<S: ChannelStore, B: MessageBus> core::fmt::Debug for ProtocolRunner<S, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProtocolRunner")
            .field("identifier", &self.identifier)
            .field("address", &self.signer.address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, B> ProtocolRunner<S, B>
where
    S: ChannelStore + 'static,
    B: MessageBus + 'static,
{
    pub fn new(
        identifier: impl Into<String>,
        signer: Signer,
        store: Arc<S>,
        bus: B,
        registry: Arc<AppRegistry>,
        config: RunnerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            identifier: identifier.into(),
            signer,
            store,
            bus,
            registry,
            locks: LockService::new(),
            inflight: Mutex::new(HashMap::new()),
            replay: Mutex::new(ReplayCache::new(config.replay_cache_capacity)),
            config,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Opens a channel with `counterparty`. The channel id is derived from
    /// both identifiers and the salt.
    pub async fn setup(
        &self,
        counterparty: &str,
        params: SetupParams,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        let id = channel_id(&self.identifier, counterparty, params.salt)?;
        self.execute(id, counterparty, ProtocolParams::Setup(params))
            .await
    }

    /// Proposes an app, the new proposal's identity hash is in the outcome.
    pub async fn propose(
        &self,
        channel_id: Hash,
        params: ProposeParams,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        let counterparty = self.counterparty_in(channel_id).await?;
        self.execute(channel_id, &counterparty, ProtocolParams::Propose(params))
            .await
    }

    pub async fn install(&self, app_identity_hash: Hash) -> Result<ProtocolOutcome, ProtocolError> {
        let (channel_id, counterparty) = self.channel_of_app(app_identity_hash).await?;
        self.execute(
            channel_id,
            &counterparty,
            ProtocolParams::Install(InstallParams { app_identity_hash }),
        )
        .await
    }

    /// Applies `action` to the app. Fails with [ProtocolError::StaleVersion]
    /// unless the app is still at `expected_version`.
    pub async fn take_action(
        &self,
        app_identity_hash: Hash,
        action: Vec<u8>,
        expected_version: u64,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        let (channel_id, counterparty) = self.channel_of_app(app_identity_hash).await?;
        self.execute(
            channel_id,
            &counterparty,
            ProtocolParams::TakeAction(TakeActionParams {
                app_identity_hash,
                action,
                expected_version,
            }),
        )
        .await
    }

    pub async fn uninstall(
        &self,
        app_identity_hash: Hash,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        let (channel_id, counterparty) = self.channel_of_app(app_identity_hash).await?;
        self.execute(
            channel_id,
            &counterparty,
            ProtocolParams::Uninstall(UninstallParams { app_identity_hash }),
        )
        .await
    }

    pub async fn withdraw(
        &self,
        channel_id: Hash,
        params: WithdrawParams,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        let counterparty = self.counterparty_in(channel_id).await?;
        self.execute(channel_id, &counterparty, ProtocolParams::Withdraw(params))
            .await
    }

    /// Drops a pending proposal from the local store. Purely local, the
    /// counterparty is not involved.
    pub async fn reject_proposal(
        &self,
        channel_id: Hash,
        app_identity_hash: Hash,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        let lock = channel_lock_name(&channel_id);
        let key = self.locks.acquire(&lock, self.config.lock_timeout).await;
        let result = async {
            let channel = self
                .store
                .get_channel(channel_id)
                .await?
                .ok_or(ProtocolError::ChannelNotFound(channel_id))?;
            if channel.proposal(&app_identity_hash).is_none() {
                return Err(ProtocolError::AppNotFound(app_identity_hash));
            }
            self.ensure_held(&lock, key)?;
            let prepared = Prepared {
                channel,
                transition: Transition::RejectProposal(app_identity_hash),
                commitment: None,
                app_identity_hash: Some(app_identity_hash),
            };
            let channel = prepared.commit(self.store.as_ref(), None).await?;
            info!(app = %app_identity_hash, "proposal rejected");
            Ok(ProtocolOutcome {
                channel,
                app_identity_hash: Some(app_identity_hash),
            })
        }
        .await;
        self.finish(&lock, key, result)
    }

    /// Runs a protocol as initiator against `counterparty`.
    ///
    /// On any error the local store is exactly as before the call.
    pub async fn execute(
        &self,
        channel_id: Hash,
        counterparty: &str,
        params: ProtocolParams,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        let protocol = params.protocol();
        let process_id: Hash = rand::random();
        let span = info_span!(
            "protocol",
            %protocol,
            %process_id,
            role = %Role::Initiator,
            %counterparty,
        );

        async move {
            let lock = channel_lock_name(&channel_id);
            let key = self.locks.acquire(&lock, self.config.lock_timeout).await;
            let mut run = Run::new(protocol, Role::Initiator);
            let result = self
                .initiate(&mut run, &lock, key, channel_id, counterparty, process_id, params)
                .await;
            if let Err(e) = &result {
                run.abort(e);
            }
            self.finish(&lock, key, result)
        }
        .instrument(span)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn initiate(
        &self,
        run: &mut Run,
        lock: &str,
        key: LockKey,
        channel_id: Hash,
        counterparty: &str,
        process_id: Hash,
        params: ProtocolParams,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        let roles = Roles {
            initiator: &self.identifier,
            responder: counterparty,
        };
        let current = self.store.get_channel(channel_id).await?;
        let prepared = self.prepare(channel_id, current, &params, &roles)?;
        if prepared.channel.id != channel_id {
            return Err(ProtocolError::InvalidParameters(format!(
                "parameters describe channel {}, not {}",
                prepared.channel.id, channel_id
            )));
        }
        let [own, other] = roles.indices(&prepared.channel)?;
        self.ensure_own_signer(&prepared.channel, own)?;

        let signature = match &prepared.commitment {
            Some(commitment) => Some(self.sign(commitment.hash)?),
            None => None,
        };
        let params = prepared.pin(params);
        let request = ProtocolMessage {
            protocol: params.protocol(),
            process_id,
            seq: SEQ_PARAMS,
            from: self.identifier.clone(),
            to: counterparty.to_owned(),
            channel_id,
            payload: Payload::Params(params, signature),
        };

        // Registered before sending, a fast reply must find it.
        let (tx, rx) = oneshot::channel();
        self.inflight.lock().insert(
            process_id,
            Pending {
                counterparty: counterparty.to_owned(),
                reply: tx,
            },
        );
        run.advance(RunState::AwaitingCounterpartySignature);
        let reply = match self.bus.send(request).await {
            Ok(()) => timeout(self.config.protocol_timeout, rx).await,
            Err(e) => {
                self.inflight.lock().remove(&process_id);
                return Err(e.into());
            }
        };
        self.inflight.lock().remove(&process_id);
        let reply = match reply {
            Ok(Ok(reply)) => reply,
            _ => return Err(ProtocolError::CounterpartyTimeout(counterparty.to_owned())),
        };

        run.advance(RunState::Validating);
        let commitment_hash = prepared.commitment.as_ref().map(|c| c.hash);
        let signatures = match (commitment_hash, reply.payload) {
            (_, Payload::Rejected(reason)) => return Err(ProtocolError::Rejected { reason }),
            (Some(commitment_hash), Payload::Countersign(theirs)) => {
                self.verify(
                    commitment_hash,
                    theirs,
                    prepared.channel.participants[other].signer,
                )?;
                let mut signatures = [Signature::default(); 2];
                signatures[own] = signature.unwrap_or_default();
                signatures[other] = theirs;
                Some(signatures)
            }
            (Some(_), Payload::Latest(latest)) => {
                let current = latest.version;
                let expected = self.adopt_latest(lock, key, prepared, latest).await?;
                return Err(ProtocolError::StaleVersion { expected, current });
            }
            (None, Payload::Ack(hash)) if Some(hash) == prepared.app_identity_hash => None,
            (None, Payload::Ack(hash)) => {
                return Err(ProtocolError::Rejected {
                    reason: format!("counterparty stored proposal {}", hash),
                })
            }
            (Some(_), _) => {
                return Err(ProtocolError::SignatureInvalid(
                    "reply carries no countersignature".into(),
                ))
            }
            (None, _) => {
                return Err(ProtocolError::Rejected {
                    reason: "unexpected reply".into(),
                })
            }
        };

        self.commit(run, lock, key, prepared, signatures).await
    }

    /// Adopts the counterparty's latest signed state of the app a TakeAction
    /// run was about, if it is exactly one version ahead. Returns the version
    /// the app was at before.
    async fn adopt_latest(
        &self,
        lock: &str,
        key: LockKey,
        prepared: Prepared,
        latest: SignedAppState,
    ) -> Result<u64, ProtocolError> {
        let hash = latest.app_identity_hash;
        if prepared.app_identity_hash != Some(hash) {
            return Err(ProtocolError::Rejected {
                reason: format!("counterparty sent the state of app {}", hash),
            });
        }
        let channel = prepared.channel;
        let app = channel.app(&hash).ok_or(ProtocolError::AppNotFound(hash))?;
        let local = app.latest_version_number;
        let action = match latest.action {
            Some(action) if latest.version == local + 1 => action,
            _ => {
                return Err(ProtocolError::OutOfSync {
                    app: hash,
                    local,
                    remote: latest.version,
                })
            }
        };

        let transition = Transition::SetState(app.with_next_state(latest.state, action));
        let commitment = commitment::build(ProtocolName::TakeAction, &channel, &transition)?;
        for (participant, signature) in channel.participants.iter().zip(latest.signatures) {
            self.verify(commitment.hash, signature, participant.signer)?;
        }

        self.ensure_held(lock, key)?;
        let adopted = Prepared {
            channel,
            transition,
            commitment: Some(commitment),
            app_identity_hash: Some(hash),
        };
        adopted
            .commit(self.store.as_ref(), Some(latest.signatures))
            .await?;
        info!(app = %hash, from = local, to = latest.version, "caught up with counterparty");
        Ok(local)
    }

    /// Entry point for every decoded message addressed to this party.
    pub async fn handle_message(self: &Arc<Self>, msg: ProtocolMessage) {
        if msg.to != self.identifier {
            debug!(to = %msg.to, "ignoring message for someone else");
            return;
        }
        match msg.seq {
            SEQ_PARAMS => {
                let claim = self.replay.lock().claim(msg.process_id);
                match claim {
                    Claim::New => {
                        let runner = Arc::clone(self);
                        tokio::spawn(async move { runner.respond(msg).await });
                    }
                    Claim::Completed(reply) => {
                        debug!(process_id = %msg.process_id, "duplicate of a finished run, sending reply again");
                        if let Err(e) = self.bus.send(reply).await {
                            warn!(error = %e, "re-sending reply failed");
                        }
                    }
                    Claim::Running | Claim::Aborted => {
                        debug!(process_id = %msg.process_id, "ignoring duplicate");
                    }
                }
            }
            SEQ_REPLY => {
                let pending = {
                    let mut inflight = self.inflight.lock();
                    let expected = inflight
                        .get(&msg.process_id)
                        .map(|p| p.counterparty == msg.from);
                    match expected {
                        Some(true) => inflight.remove(&msg.process_id),
                        _ => None,
                    }
                };
                match pending {
                    // The run may have given up in the meantime.
                    Some(pending) => {
                        let _ = pending.reply.send(msg);
                    }
                    None => debug!(process_id = %msg.process_id, "ignoring reply without waiting run"),
                }
            }
            seq => debug!(seq, "ignoring message with unknown sequence number"),
        }
    }

    /// Feeds every frame arriving on `inbox` into [Self::handle_message].
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                match decode_message(&frame) {
                    Ok(msg) => runner.handle_message(msg).await,
                    Err(e) => warn!(error = %e, "dropping undecodable frame"),
                }
            }
            debug!(identifier = %runner.identifier, "inbox closed");
        })
    }

    async fn respond(self: Arc<Self>, msg: ProtocolMessage) {
        let span = info_span!(
            "protocol",
            protocol = %msg.protocol,
            process_id = %msg.process_id,
            role = %Role::Responder,
            counterparty = %msg.from,
        );

        async {
            let mut run = Run::new(msg.protocol, Role::Responder);
            let lock = channel_lock_name(&msg.channel_id);
            let key = timeout(
                self.config.protocol_timeout,
                self.locks.acquire(&lock, self.config.lock_timeout),
            )
            .await
            .ok();
            let result = match key {
                Some(key) => {
                    let result = self.accept(&mut run, &msg, &lock, key).await;
                    self.finish(&lock, key, result)
                }
                None => Err(ProtocolError::ChannelBusy(msg.channel_id)),
            };

            let reply = match result {
                Ok(payload) => {
                    let reply = msg.reply(payload);
                    self.replay.lock().complete(msg.process_id, reply.clone());
                    reply
                }
                Err(e) => {
                    run.abort(&e);
                    self.replay.lock().abort(msg.process_id);
                    msg.reply(Payload::Rejected(e.to_string()))
                }
            };
            if let Err(e) = self.bus.send(reply).await {
                warn!(error = %e, "sending reply failed");
            }
        }
        .instrument(span)
        .await
    }

    async fn accept(
        &self,
        run: &mut Run,
        msg: &ProtocolMessage,
        lock: &str,
        key: LockKey,
    ) -> Result<Payload, ProtocolError> {
        let (params, initiator_signature) = match &msg.payload {
            Payload::Params(params, signature) => (params, *signature),
            _ => {
                return Err(ProtocolError::InvalidParameters(
                    "expected protocol parameters".into(),
                ))
            }
        };
        let roles = Roles {
            initiator: &msg.from,
            responder: &self.identifier,
        };

        let current = self.store.get_channel(msg.channel_id).await?;
        run.advance(RunState::Validating);
        if let ProtocolParams::Propose(ProposeParams { app_seq_no: None, .. }) = params {
            return Err(ProtocolError::InvalidParameters(
                "proposal without sequence number".into(),
            ));
        }
        let prepared = match self.prepare(msg.channel_id, current.clone(), params, &roles) {
            Ok(prepared) => prepared,
            Err(e) => {
                return match current {
                    Some(channel) => {
                        self.answer_again(&channel, params, initiator_signature, &roles, e)
                    }
                    None => Err(e),
                }
            }
        };
        if prepared.channel.id != msg.channel_id {
            return Err(ProtocolError::InvalidParameters(format!(
                "parameters describe channel {}, not {}",
                prepared.channel.id, msg.channel_id
            )));
        }
        let [other, own] = roles.indices(&prepared.channel)?;
        self.ensure_own_signer(&prepared.channel, own)?;

        let (payload, signatures) = match &prepared.commitment {
            Some(commitment) => {
                let theirs = initiator_signature.ok_or_else(|| {
                    ProtocolError::SignatureInvalid("initiator signature missing".into())
                })?;
                self.verify(
                    commitment.hash,
                    theirs,
                    prepared.channel.participants[other].signer,
                )?;
                let ours = self.sign(commitment.hash)?;
                let mut signatures = [Signature::default(); 2];
                signatures[other] = theirs;
                signatures[own] = ours;
                (Payload::Countersign(ours), Some(signatures))
            }
            None => match prepared.app_identity_hash {
                Some(hash) => (Payload::Ack(hash), None),
                None => {
                    return Err(ProtocolError::InvalidParameters(
                        "nothing to acknowledge".into(),
                    ))
                }
            },
        };

        self.commit(run, lock, key, prepared, signatures).await?;
        Ok(payload)
    }

    /// Answer to a run that failed validation because this side got ahead of
    /// the initiator, usually after the initiator lost an earlier reply.
    ///
    /// A retry of a run committed here is answered as before, the
    /// initiator's signature proving it signs the same commitment again. A
    /// TakeAction on another version gets the app's latest signed state.
    fn answer_again(
        &self,
        channel: &StateChannel,
        params: &ProtocolParams,
        initiator_signature: Option<Signature>,
        roles: &Roles<'_>,
        error: ProtocolError,
    ) -> Result<Payload, ProtocolError> {
        let Ok([other, own]) = roles.indices(channel) else {
            return Err(error);
        };
        let stored = match params {
            ProtocolParams::Setup(p) => {
                let fresh = setup::prepare(p, roles)?;
                match (&fresh.commitment, initiator_signature) {
                    (Some(commitment), Some(theirs)) if fresh.channel == *channel => {
                        self.verify(commitment.hash, theirs, channel.participants[other].signer)?;
                        debug!("channel set up before, countersigning again");
                        return Ok(Payload::Countersign(self.sign(commitment.hash)?));
                    }
                    _ => None,
                }
            }
            ProtocolParams::Propose(p) => {
                if let Some(hash) = propose::stored_proposal(channel, p) {
                    debug!(app = %hash, "proposal stored before, acknowledging again");
                    return Ok(Payload::Ack(hash));
                }
                None
            }
            ProtocolParams::Install(InstallParams { app_identity_hash })
            | ProtocolParams::TakeAction(TakeActionParams {
                app_identity_hash, ..
            }) => channel
                .app(app_identity_hash)
                .and_then(|app| app.latest_signatures),
            ProtocolParams::Withdraw(_) => channel.withdrawals.last().and_then(|w| w.signatures),
            ProtocolParams::Uninstall(_) => None,
        };

        if let (Some(signatures), Some(theirs)) = (stored, initiator_signature) {
            if signatures[other] == theirs {
                debug!("run committed before, countersigning again");
                return Ok(Payload::Countersign(signatures[own]));
            }
        }
        if let (ProtocolParams::TakeAction(p), ProtocolError::StaleVersion { .. }) =
            (params, &error)
        {
            if let Some(latest) = channel.app(&p.app_identity_hash).and_then(signed_state) {
                warn!(%error, version = latest.version, "answering with latest signed state");
                return Ok(Payload::Latest(latest));
            }
        }
        Err(error)
    }

    fn prepare(
        &self,
        channel_id: Hash,
        current: Option<StateChannel>,
        params: &ProtocolParams,
        roles: &Roles<'_>,
    ) -> Result<Prepared, ProtocolError> {
        match (params, current) {
            (ProtocolParams::Setup(p), None) => setup::prepare(p, roles),
            (ProtocolParams::Setup(_), Some(_)) => Err(ProtocolError::InvalidParameters(format!(
                "channel {} already exists",
                channel_id
            ))),
            (_, None) => Err(ProtocolError::ChannelNotFound(channel_id)),
            (ProtocolParams::Propose(p), Some(c)) => propose::prepare(&self.registry, c, p, roles),
            (ProtocolParams::Install(p), Some(c)) => install::prepare(c, p, roles),
            (ProtocolParams::TakeAction(p), Some(c)) => {
                take_action::prepare(&self.registry, c, p, roles)
            }
            (ProtocolParams::Uninstall(p), Some(c)) => {
                uninstall::prepare(&self.registry, c, p, roles)
            }
            (ProtocolParams::Withdraw(p), Some(c)) => withdraw::prepare(c, p, roles),
        }
    }

    async fn commit(
        &self,
        run: &mut Run,
        lock: &str,
        key: LockKey,
        prepared: Prepared,
        signatures: Option<[Signature; 2]>,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        self.ensure_held(lock, key)?;
        let app_identity_hash = prepared.app_identity_hash;
        let channel = prepared.commit(self.store.as_ref(), signatures).await?;
        run.advance(RunState::Committed);
        info!(channel = %channel.id, fb_version = channel.free_balance.version, "committed");
        Ok(ProtocolOutcome {
            channel,
            app_identity_hash,
        })
    }

    /// Releases the run's lock. A failed run keeps its own error, a lock
    /// problem only surfaces when the run itself went through.
    fn finish<T>(
        &self,
        lock: &str,
        key: LockKey,
        result: Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        match (result, self.locks.release(lock, key)) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release)) => {
                warn!(error = %release, "releasing lock of failed run");
                Err(e)
            }
        }
    }

    fn ensure_held(&self, lock: &str, key: LockKey) -> Result<(), ProtocolError> {
        if self.locks.is_held(lock, key) {
            Ok(())
        } else {
            Err(LockError::InvalidLockKey(lock.to_owned()).into())
        }
    }

    fn ensure_own_signer(&self, channel: &StateChannel, own: PartIdx) -> Result<(), ProtocolError> {
        let expected = channel.participants[own].signer;
        if expected == self.signer.address() {
            Ok(())
        } else {
            Err(ProtocolError::InvalidParameters(format!(
                "channel expects {} to sign as {}, not {}",
                self.identifier,
                expected,
                self.signer.address()
            )))
        }
    }

    fn sign(&self, hash: Hash) -> Result<Signature, ProtocolError> {
        self.signer
            .sign_eth(hash)
            .map_err(|e| ProtocolError::SignatureInvalid(e.to_string()))
    }

    fn verify(&self, hash: Hash, signature: Signature, expected: Address) -> Result<(), ProtocolError> {
        match recover_signer(hash, signature) {
            Ok(signer) if signer == expected => Ok(()),
            Ok(signer) => Err(ProtocolError::SignatureInvalid(format!(
                "signed by {} instead of {}",
                signer, expected
            ))),
            Err(e) => Err(ProtocolError::SignatureInvalid(e.to_string())),
        }
    }

    async fn counterparty_in(&self, channel_id: Hash) -> Result<String, ProtocolError> {
        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or(ProtocolError::ChannelNotFound(channel_id))?;
        self.counterparty_of(&channel)
    }

    async fn channel_of_app(&self, app_identity_hash: Hash) -> Result<(Hash, String), ProtocolError> {
        let channel = self
            .store
            .get_channel_by_app_identity_hash(app_identity_hash)
            .await?
            .ok_or(ProtocolError::AppNotFound(app_identity_hash))?;
        Ok((channel.id, self.counterparty_of(&channel)?))
    }

    fn counterparty_of(&self, channel: &StateChannel) -> Result<String, ProtocolError> {
        let own = channel.index_of(&self.identifier).ok_or_else(|| {
            ProtocolError::InvalidParameters(format!(
                "{} is not a participant of channel {}",
                self.identifier, channel.id
            ))
        })?;
        Ok(channel.participants[1 - own].identifier.clone())
    }
}
