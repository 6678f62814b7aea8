//! Call negotiation state machine
//!
//! One [`CallManager`] per participant. It owns at most one call at a time,
//! turns signaling messages and peer backend events into state transitions,
//! and publishes the result through its [`CallStore`].
//!
//! All mutation happens under a single async mutex, so inputs are applied
//! one at a time in the order the run loop receives them.

use crate::config::CallConfig;
use crate::identity::{ParticipantId, Participants};
use crate::incoming::Ringer;
use crate::media::{AcquisitionNotice, AudioOutput, CaptureError, DeviceAccess, MediaError, RemoteStream};
use crate::peer::{
    CallInput, PeerConnectionState, PeerError, PeerEvent, PeerEventSink, PeerSession,
    PeerSessionConfig, PeerSessionFactory,
};
use crate::session::{CallSession, CallStore, PendingIncomingCall};
use crate::signaling::{Signal, SignalMessage, SignalingChannel, SignalingError};
use crate::types::{CallEvent, CallId, CallState, EndReason, IceCandidate, MediaKind, SessionDescription};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Call management errors
#[derive(Error, Debug)]
pub enum CallError {
    /// A call is already in progress
    #[error("A call is already in progress")]
    CallInProgress,

    /// An offer is waiting for the user
    #[error("An incoming call is waiting for an answer")]
    IncomingCallPending,

    /// No call to act on
    #[error("No active call")]
    NoActiveCall,

    /// No offer to accept or decline
    #[error("No pending incoming call")]
    NoPendingCall,

    /// Cannot call this participant
    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),

    /// The local stream has no track of this kind
    #[error("No local {0} track")]
    NoLocalTrack(MediaKind),

    /// Negotiation failed
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] PeerError),

    /// Signaling failed
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// Device operation failed
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// Playback element cannot route to a chosen device
    #[error("Audio output selection is not supported")]
    OutputSelectionUnsupported,
}

impl From<CaptureError> for CallError {
    fn from(err: CaptureError) -> Self {
        CallError::Media(MediaError::Capture(err))
    }
}

/// Settled call ids remembered to drop redelivered offers
const SETTLED_CALL_HISTORY: usize = 32;

/// Mutable negotiation state guarded by the manager's mutex
#[derive(Default)]
pub(crate) struct CallCore {
    pub(crate) call_id: Option<CallId>,
    pub(crate) peer: Option<Arc<dyn PeerSession>>,
    remote_description_set: bool,
    early_candidates: Vec<IceCandidate>,
    offer_timer: Option<JoinHandle<()>>,
    incoming_timer: Option<JoinHandle<()>>,
    settled: VecDeque<CallId>,
}

impl CallCore {
    fn cancel_timers(&mut self) {
        for timer in [self.offer_timer.take(), self.incoming_timer.take()].into_iter().flatten() {
            timer.abort();
        }
    }

    /// Record a call that can no longer be offered again
    fn settle(&mut self, call_id: CallId) {
        if self.settled.contains(&call_id) {
            return;
        }
        if self.settled.len() == SETTLED_CALL_HISTORY {
            self.settled.pop_front();
        }
        self.settled.push_back(call_id);
    }

    fn is_settled(&self, call_id: CallId) -> bool {
        self.settled.contains(&call_id)
    }
}

/// Collaborators a [`CallManager`] is built from
pub struct CallManagerDeps {
    /// This participant
    pub local_id: ParticipantId,
    /// Timeouts, ICE servers and capture preferences
    pub config: CallConfig,
    /// Shared signaling topic
    pub signaling: Arc<SignalingChannel>,
    /// Local capture
    pub devices: DeviceAccess,
    /// Peer backend
    pub peers: Arc<dyn PeerSessionFactory>,
    /// Observable state
    pub store: CallStore,
    /// Ringing indication for incoming offers
    pub ringer: Arc<dyn Ringer>,
    /// Playback element, if the platform has one
    pub audio_output: Option<Arc<dyn AudioOutput>>,
}

/// Call manager
pub struct CallManager {
    pub(crate) local_id: ParticipantId,
    config: CallConfig,
    signaling: Arc<SignalingChannel>,
    pub(crate) devices: DeviceAccess,
    peers: Arc<dyn PeerSessionFactory>,
    pub(crate) store: CallStore,
    ringer: Arc<dyn Ringer>,
    pub(crate) audio_output: Option<Arc<dyn AudioOutput>>,
    event_sender: broadcast::Sender<CallEvent>,
    inputs_tx: mpsc::UnboundedSender<CallInput>,
    inputs_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<CallInput>>>,
    halt: watch::Sender<bool>,
    pub(crate) core: Mutex<CallCore>,
}

impl CallManager {
    /// Create a call manager
    #[must_use]
    pub fn new(deps: CallManagerDeps) -> Self {
        let (event_sender, _) = broadcast::channel(256);
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (halt, _) = watch::channel(false);
        Self {
            local_id: deps.local_id,
            config: deps.config,
            signaling: deps.signaling,
            devices: deps.devices,
            peers: deps.peers,
            store: deps.store,
            ringer: deps.ringer,
            audio_output: deps.audio_output,
            event_sender,
            inputs_tx,
            inputs_rx: parking_lot::Mutex::new(Some(inputs_rx)),
            halt,
            core: Mutex::new(CallCore::default()),
        }
    }

    /// This participant
    #[must_use]
    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Observable state
    #[must_use]
    pub fn store(&self) -> &CallStore {
        &self.store
    }

    /// Current negotiation state
    #[must_use]
    pub fn state(&self) -> CallState {
        self.store.state()
    }

    /// Subscribe to call events
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.event_sender.subscribe()
    }

    /// Process signaling messages and internal inputs until halted or
    /// signaling closes
    ///
    /// Returns the signaling receiver so a later run can pick it up again.
    /// Only one run is active at a time; the manager has one input queue.
    pub async fn run(
        self: Arc<Self>,
        mut signals: mpsc::UnboundedReceiver<SignalMessage>,
    ) -> mpsc::UnboundedReceiver<SignalMessage> {
        let Some(mut inputs) = self.inputs_rx.lock().take() else {
            tracing::warn!(local = %self.local_id, "Call manager already running");
            return signals;
        };
        let mut halt = self.halt.subscribe();
        tracing::debug!(local = %self.local_id, "Call manager running");

        loop {
            tokio::select! {
                _ = async { halt.wait_for(|halted| *halted).await.map(|_| ()) } => {
                    tracing::debug!(local = %self.local_id, "Call manager halted");
                    break;
                }
                signal = signals.recv() => match signal {
                    Some(message) => self.handle_signal(message).await,
                    None => {
                        tracing::info!(local = %self.local_id, "Signaling closed, call manager stopping");
                        break;
                    }
                },
                Some(input) = inputs.recv() => self.handle_input(input).await,
            }
        }

        self.halt.send_replace(false);
        *self.inputs_rx.lock() = Some(inputs);
        signals
    }

    /// Ask the running loop to return
    pub fn halt(&self) {
        self.halt.send_replace(true);
    }

    /// Start a call to `remote` with a fresh call id
    ///
    /// # Errors
    ///
    /// Returns error if a call or offer is already in progress, or the
    /// offer could not be produced or sent
    pub async fn initiate_call(&self, remote: ParticipantId) -> Result<CallId, CallError> {
        self.initiate_call_with_id(remote, CallId::new()).await
    }

    /// Start a call to `remote` under `call_id`
    ///
    /// # Errors
    ///
    /// Returns error if a call or offer is already in progress, or the
    /// offer could not be produced or sent
    #[tracing::instrument(skip(self), fields(local = %self.local_id, remote = %remote, call_id = %call_id))]
    pub async fn initiate_call_with_id(
        &self,
        remote: ParticipantId,
        call_id: CallId,
    ) -> Result<CallId, CallError> {
        let participants = Participants::new(self.local_id.clone(), remote.clone())
            .ok_or_else(|| CallError::InvalidParticipant(remote.to_string()))?;

        let mut core = self.core.lock().await;
        self.ensure_idle(&core)?;

        let acquisition = self.devices.acquire_stream(true, true).await;
        self.report_notices(call_id, &acquisition.notices);
        let stream = acquisition.stream;

        core.call_id = Some(call_id);
        self.store
            .set_session(Some(CallSession::new(call_id, participants, stream.clone())));
        self.set_state(Some(call_id), CallState::Offering);

        let negotiated = async {
            let peer = self.create_peer(&mut core, call_id).await?;
            for track in stream.tracks() {
                peer.add_track(track).await?;
            }
            let offer = peer.create_offer().await?;
            peer.set_local_description(offer.clone()).await?;
            let message = SignalMessage::new(Signal::Offer(offer), self.local_id.clone(), remote.as_str(), call_id);
            self.signaling.send(&message).await?;
            Ok::<(), CallError>(())
        }
        .await;

        if let Err(e) = negotiated {
            self.fail_call(&mut core, call_id, &e).await;
            return Err(e);
        }

        core.offer_timer = Some(self.spawn_timer(
            self.config.outgoing_offer_timeout(),
            CallInput::OfferExpired(call_id),
        ));
        self.emit(CallEvent::CallInitiated {
            call_id,
            callee: remote,
        });
        tracing::info!("Call initiated");
        Ok(call_id)
    }

    /// Answer the pending incoming offer
    ///
    /// # Errors
    ///
    /// Returns error if no offer is pending or the answer could not be
    /// produced or sent
    #[tracing::instrument(skip(self), fields(local = %self.local_id))]
    pub async fn accept_incoming(&self) -> Result<CallId, CallError> {
        let mut core = self.core.lock().await;
        let offer = self
            .store
            .pending()
            .and_then(|p| p.offer)
            .ok_or(CallError::NoPendingCall)?;
        let Signal::Offer(remote_offer) = offer.signal else {
            return Err(CallError::NoPendingCall);
        };
        let call_id = offer.call_id;
        let caller = offer.from;

        self.clear_pending(&mut core);
        let participants = Participants::new(caller.clone(), self.local_id.clone())
            .ok_or_else(|| CallError::InvalidParticipant(caller.to_string()))?;
        self.emit(CallEvent::CallAccepted { call_id });

        let acquisition = self.devices.acquire_stream(true, true).await;
        self.report_notices(call_id, &acquisition.notices);
        let stream = acquisition.stream;

        core.call_id = Some(call_id);
        self.store
            .set_session(Some(CallSession::new(call_id, participants, stream.clone())));
        self.set_state(Some(call_id), CallState::Answering);

        let negotiated = async {
            let peer = self.create_peer(&mut core, call_id).await?;
            for track in stream.tracks() {
                peer.add_track(track).await?;
            }
            peer.set_remote_description(remote_offer).await?;
            core.remote_description_set = true;
            self.flush_candidates(&mut core, &peer).await;

            let answer = peer.create_answer().await?;
            peer.set_local_description(answer.clone()).await?;
            let message = SignalMessage::new(Signal::Answer(answer), self.local_id.clone(), caller.as_str(), call_id);
            self.signaling.send(&message).await?;
            Ok::<(), CallError>(())
        }
        .await;

        if let Err(e) = negotiated {
            self.fail_call(&mut core, call_id, &e).await;
            return Err(e);
        }

        self.set_state(Some(call_id), CallState::Connecting);
        tracing::info!(call_id = %call_id, caller = %caller, "Call accepted");
        Ok(call_id)
    }

    /// Refuse the pending incoming offer
    ///
    /// # Errors
    ///
    /// Returns error if no offer is pending or the decline could not be sent
    #[tracing::instrument(skip(self), fields(local = %self.local_id))]
    pub async fn decline_incoming(&self) -> Result<(), CallError> {
        let mut core = self.core.lock().await;
        let offer = self
            .store
            .pending()
            .and_then(|p| p.offer)
            .ok_or(CallError::NoPendingCall)?;

        self.clear_pending(&mut core);
        core.early_candidates.clear();
        self.emit(CallEvent::CallDeclined {
            call_id: offer.call_id,
        });
        tracing::info!(call_id = %offer.call_id, caller = %offer.from, "Call declined");

        let reply = SignalMessage::new(
            Signal::EndCall {
                reason: Some(EndReason::Declined),
            },
            self.local_id.clone(),
            offer.from.as_str(),
            offer.call_id,
        );
        self.signaling.send(&reply).await?;
        Ok(())
    }

    /// Hang up; safe from any state
    ///
    /// Broadcasts `end-call` when a call exists, then cleans up.
    #[tracing::instrument(skip(self), fields(local = %self.local_id))]
    pub async fn end_call(&self) {
        let mut core = self.core.lock().await;
        let Some(call_id) = core.call_id else {
            self.cleanup_locked(&mut core).await;
            return;
        };

        let message = SignalMessage::new(
            Signal::EndCall {
                reason: Some(EndReason::Hangup),
            },
            self.local_id.clone(),
            "",
            call_id,
        );
        // Failure is already logged; local teardown goes ahead regardless
        let _ = self.signaling.send(&message).await;

        self.finish_call(&mut core, call_id, CallState::Ended, EndReason::Hangup)
            .await;
        tracing::info!(call_id = %call_id, "Call ended locally");
    }

    /// Release everything held for the current call; idempotent
    pub async fn cleanup(&self) {
        let mut core = self.core.lock().await;
        self.cleanup_locked(&mut core).await;
    }

    /// Apply one signaling message
    #[tracing::instrument(skip(self, message), fields(local = %self.local_id, kind = %message.kind(), from = %message.from, call_id = %message.call_id))]
    pub async fn handle_signal(&self, message: SignalMessage) {
        if message.from == self.local_id {
            tracing::trace!("Ignoring own message");
            return;
        }
        if !message.is_addressed_to(&self.local_id) {
            tracing::trace!(to = %message.to, "Ignoring message for another participant");
            return;
        }

        let mut core = self.core.lock().await;
        let call_id = message.call_id;
        let result = match message.signal.clone() {
            Signal::Offer(_) => self.on_offer(&mut core, message).await,
            Signal::Answer(answer) => self.on_answer(&mut core, &message.from, call_id, answer).await,
            Signal::IceCandidate(candidate) => {
                self.on_remote_candidate(&mut core, &message.from, call_id, candidate).await;
                Ok(())
            }
            Signal::EndCall { reason } => {
                self.on_end_call(&mut core, &message.from, call_id, reason).await;
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to handle signaling message");
        }
    }

    /// Apply one internal input
    pub async fn handle_input(&self, input: CallInput) {
        let mut core = self.core.lock().await;
        match input {
            CallInput::Peer { call_id, event } => {
                if core.call_id != Some(call_id) {
                    tracing::trace!(call_id = %call_id, "Ignoring event from stale peer session");
                    return;
                }
                self.on_peer_event(&mut core, call_id, event).await;
            }
            CallInput::IncomingExpired(call_id) => {
                let Some(offer) = self.pending_offer() else {
                    return;
                };
                if offer.call_id != call_id {
                    return;
                }
                tracing::info!(call_id = %call_id, caller = %offer.from, "Incoming call not answered");
                self.clear_pending(&mut core);
                core.early_candidates.clear();
                self.emit(CallEvent::MissedCall {
                    call_id,
                    caller: offer.from,
                });
            }
            CallInput::OfferExpired(call_id) => {
                if core.call_id != Some(call_id) || self.store.state() != CallState::Offering {
                    return;
                }
                tracing::info!(call_id = %call_id, "Outgoing call not answered");
                if let Some(remote) = self.remote_party() {
                    let message = SignalMessage::new(
                        Signal::EndCall {
                            reason: Some(EndReason::Timeout),
                        },
                        self.local_id.clone(),
                        remote.as_str(),
                        call_id,
                    );
                    let _ = self.signaling.send(&message).await;
                }
                self.finish_call(&mut core, call_id, CallState::Ended, EndReason::Timeout)
                    .await;
            }
        }
    }

    async fn on_offer(&self, core: &mut CallCore, message: SignalMessage) -> Result<(), CallError> {
        let call_id = message.call_id;
        let pending_id = self.pending_offer().map(|o| o.call_id);

        if core.call_id == Some(call_id) || pending_id == Some(call_id) || core.is_settled(call_id) {
            tracing::debug!("Ignoring duplicate offer");
            return Ok(());
        }

        if core.call_id.is_some() || pending_id.is_some() {
            tracing::info!(caller = %message.from, "Busy, rejecting incoming offer");
            let reply = SignalMessage::new(
                Signal::EndCall {
                    reason: Some(EndReason::Busy),
                },
                self.local_id.clone(),
                message.from.as_str(),
                call_id,
            );
            self.signaling.send(&reply).await?;
            return Ok(());
        }

        let caller = message.from.clone();
        core.early_candidates.clear();
        self.store
            .set_pending(Some(PendingIncomingCall::from_offer(message)));
        self.ringer.start_ringing(&caller);
        core.incoming_timer = Some(self.spawn_timer(
            self.config.incoming_offer_timeout(),
            CallInput::IncomingExpired(call_id),
        ));
        self.emit(CallEvent::IncomingCall { call_id, caller });
        tracing::info!("Incoming call");
        Ok(())
    }

    async fn on_answer(
        &self,
        core: &mut CallCore,
        from: &ParticipantId,
        call_id: CallId,
        answer: SessionDescription,
    ) -> Result<(), CallError> {
        if core.call_id != Some(call_id) || self.store.state() != CallState::Offering {
            tracing::debug!(state = %self.store.state(), "Ignoring answer outside offering");
            return Ok(());
        }
        if !self.is_remote_party(from) {
            tracing::warn!("Ignoring answer from a participant outside the call");
            return Ok(());
        }
        let Some(peer) = core.peer.clone() else {
            return Ok(());
        };

        if let Err(e) = peer.set_remote_description(answer).await {
            let e = CallError::from(e);
            self.fail_call(core, call_id, &e).await;
            return Err(e);
        }
        core.remote_description_set = true;
        if let Some(timer) = core.offer_timer.take() {
            timer.abort();
        }
        self.flush_candidates(core, &peer).await;
        self.set_state(Some(call_id), CallState::Connecting);
        Ok(())
    }

    async fn on_remote_candidate(
        &self,
        core: &mut CallCore,
        from: &ParticipantId,
        call_id: CallId,
        candidate: IceCandidate,
    ) {
        let for_pending = self
            .pending_offer()
            .is_some_and(|o| o.call_id == call_id && o.from == *from);
        let current = core.call_id == Some(call_id) && self.is_remote_party(from);

        if for_pending || (current && !core.remote_description_set) {
            if core.early_candidates.len() >= self.config.max_buffered_candidates {
                tracing::warn!("Candidate buffer full, dropping remote candidate");
            } else {
                tracing::trace!("Buffering remote candidate");
                core.early_candidates.push(candidate);
            }
            return;
        }
        if !current {
            tracing::debug!("Ignoring candidate for unknown call or sender");
            return;
        }

        if let Some(peer) = core.peer.clone() {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                tracing::warn!(error = %e, "Skipping bad ICE candidate");
            }
        }
    }

    async fn on_end_call(
        &self,
        core: &mut CallCore,
        from: &ParticipantId,
        call_id: CallId,
        reason: Option<EndReason>,
    ) {
        if self
            .pending_offer()
            .is_some_and(|o| o.call_id == call_id && o.from == *from)
        {
            tracing::info!(caller = %from, "Caller withdrew the offer");
            self.clear_pending(core);
            core.early_candidates.clear();
            self.emit(CallEvent::MissedCall {
                call_id,
                caller: from.clone(),
            });
            return;
        }

        if core.call_id == Some(call_id) {
            if !self.is_remote_party(from) {
                tracing::warn!("Ignoring end-call from a participant outside the call");
                return;
            }
            let reason = reason.unwrap_or(EndReason::Hangup);
            tracing::info!(reason = %reason, "Remote ended the call");
            self.finish_call(core, call_id, CallState::Ended, reason).await;
            return;
        }

        tracing::debug!("Ignoring end-call for unknown call");
    }

    async fn on_peer_event(&self, core: &mut CallCore, call_id: CallId, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(Some(candidate)) => {
                let Some(remote) = self.remote_party() else {
                    tracing::warn!(call_id = %call_id, "No session to route local candidate");
                    return;
                };
                let message = SignalMessage::new(
                    Signal::IceCandidate(candidate),
                    self.local_id.clone(),
                    remote.as_str(),
                    call_id,
                );
                let _ = self.signaling.send(&message).await;
            }
            PeerEvent::LocalCandidate(None) => {
                tracing::debug!(call_id = %call_id, "ICE gathering complete");
            }
            PeerEvent::ConnectionState(state) => match state {
                PeerConnectionState::Connected => {
                    if self.store.state() == CallState::Connecting {
                        self.set_state(Some(call_id), CallState::Connected);
                        self.emit(CallEvent::ConnectionEstablished { call_id });
                        tracing::info!(call_id = %call_id, "Call connected");
                    }
                }
                PeerConnectionState::Failed => {
                    let e = CallError::Negotiation(PeerError::Backend("connection failed".to_string()));
                    self.fail_call(core, call_id, &e).await;
                }
                PeerConnectionState::Disconnected => {
                    tracing::warn!(call_id = %call_id, "Peer connection interrupted, waiting for recovery");
                }
                other => {
                    tracing::debug!(call_id = %call_id, peer_state = %other, "Peer connection state");
                }
            },
            PeerEvent::RemoteTrack(track) => {
                let Some(session) = self.store.session() else {
                    return;
                };
                let kind = track.kind;
                let remote_stream = match &session.remote_stream {
                    Some(stream) if stream.id == track.stream_id => stream.with_track(track),
                    _ => RemoteStream::from_track(track),
                };
                self.store.set_session(Some(CallSession {
                    remote_stream: Some(remote_stream),
                    ..session
                }));
                self.emit(CallEvent::RemoteTrackAdded { call_id, kind });
                tracing::debug!(call_id = %call_id, kind = %kind, "Remote track added");
            }
        }
    }

    fn ensure_idle(&self, core: &CallCore) -> Result<(), CallError> {
        if core.call_id.is_some() || self.store.state().is_active() {
            return Err(CallError::CallInProgress);
        }
        if self.store.pending().is_some() {
            return Err(CallError::IncomingCallPending);
        }
        Ok(())
    }

    async fn create_peer(&self, core: &mut CallCore, call_id: CallId) -> Result<Arc<dyn PeerSession>, CallError> {
        let config = PeerSessionConfig {
            ice_servers: self.config.ice_servers.clone(),
        };
        let events = PeerEventSink::new(call_id, self.inputs_tx.clone());
        let peer = self.peers.create(&config, events).await?;
        tracing::debug!(call_id = %call_id, backend = peer.backend_type(), "Created peer session");
        core.peer = Some(peer.clone());
        core.remote_description_set = false;
        Ok(peer)
    }

    async fn flush_candidates(&self, core: &mut CallCore, peer: &Arc<dyn PeerSession>) {
        let buffered = std::mem::take(&mut core.early_candidates);
        if buffered.is_empty() {
            return;
        }
        tracing::debug!(count = buffered.len(), "Applying buffered remote candidates");
        for candidate in buffered {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                tracing::warn!(error = %e, "Skipping bad ICE candidate");
            }
        }
    }

    fn pending_offer(&self) -> Option<SignalMessage> {
        self.store.pending().and_then(|p| p.offer)
    }

    fn remote_party(&self) -> Option<ParticipantId> {
        self.store
            .session()
            .and_then(|s| s.participants.other_than(&self.local_id).cloned())
    }

    fn is_remote_party(&self, from: &ParticipantId) -> bool {
        self.remote_party().is_some_and(|remote| remote == *from)
    }

    /// Clear the pending offer, stopping the ring if one was pending
    fn clear_pending(&self, core: &mut CallCore) {
        if let Some(timer) = core.incoming_timer.take() {
            timer.abort();
        }
        if let Some(pending) = self.store.pending() {
            if let Some(call_id) = pending.call_id() {
                core.settle(call_id);
            }
            self.store.set_pending(None);
            self.ringer.stop_ringing();
        }
    }

    async fn cleanup_locked(&self, core: &mut CallCore) {
        core.cancel_timers();

        if let Some(stream) = self.store.session().and_then(|s| s.local_stream) {
            stream.stop_all();
        }
        if let Some(peer) = core.peer.take() {
            if let Err(e) = peer.close().await {
                tracing::warn!(error = %e, "Failed to close peer session");
            }
        }
        self.store.set_session(None);
        self.clear_pending(core);

        if let Some(call_id) = core.call_id.take() {
            tracing::debug!(call_id = %call_id, "Call resources released");
        }
        core.remote_description_set = false;
        core.early_candidates.clear();
    }

    async fn finish_call(&self, core: &mut CallCore, call_id: CallId, state: CallState, reason: EndReason) {
        core.settle(call_id);
        self.cleanup_locked(core).await;
        self.set_state(Some(call_id), state);
        self.emit(CallEvent::CallEnded { call_id, reason });
    }

    async fn fail_call(&self, core: &mut CallCore, call_id: CallId, error: &CallError) {
        tracing::error!(call_id = %call_id, error = %error, "Call failed");
        self.finish_call(core, call_id, CallState::Failed, EndReason::Failed)
            .await;
    }

    fn set_state(&self, call_id: Option<CallId>, to: CallState) {
        let from = self.store.state();
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            tracing::warn!(call_id = ?call_id, old_state = ?from, new_state = ?to, "Invalid call state transition");
            return;
        }
        tracing::debug!(call_id = ?call_id, old_state = ?from, new_state = ?to, "Call state transition");
        self.store.set_state(to);
        self.emit(CallEvent::StateChanged { call_id, state: to });
    }

    fn report_notices(&self, call_id: CallId, notices: &[AcquisitionNotice]) {
        for notice in notices {
            tracing::warn!(call_id = %call_id, code = notice.code(), "{}", notice.message());
            self.emit(CallEvent::MediaNotice {
                call_id,
                notice: *notice,
            });
        }
    }

    fn spawn_timer(&self, after: Duration, input: CallInput) -> JoinHandle<()> {
        let tx = self.inputs_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(input);
        })
    }

    pub(crate) fn emit(&self, event: CallEvent) {
        let _ = self.event_sender.send(event);
    }
}
