//! Observable call state
//!
//! The UI reads everything through [`CallStore`]. Values are never mutated
//! in place: every change publishes a complete new value, so a subscriber
//! always sees a consistent snapshot.

use crate::identity::Participants;
use crate::media::{MediaStream, RemoteStream};
use crate::signaling::SignalMessage;
use crate::types::{CallId, CallState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// Single-value observable backed by a watch channel
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> Observable<T> {
    /// Observable starting at `value`
    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(value);
        Self { tx }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value and notify subscribers
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Receiver that sees every later replacement
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// Active call as seen by the UI
#[derive(Debug, Clone, PartialEq)]
pub struct CallSession {
    /// Call identifier
    pub id: CallId,
    /// Caller and callee
    pub participants: Participants,
    /// True until the call terminates
    pub is_active: bool,
    /// Stream captured on this side
    pub local_stream: Option<MediaStream>,
    /// Stream received from the other side
    pub remote_stream: Option<RemoteStream>,
    /// No video is flowing in at least one direction
    pub is_audio_only: bool,
    /// Microphone in use
    pub current_audio_device_id: Option<String>,
    /// Camera in use
    pub current_video_device_id: Option<String>,
    /// Speaker in use
    pub current_audio_output_id: Option<String>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    /// New active session owning `local_stream`
    #[must_use]
    pub fn new(id: CallId, participants: Participants, local_stream: MediaStream) -> Self {
        let current_audio_device_id = local_stream.audio_track().map(|t| t.device_id().to_string());
        let current_video_device_id = local_stream.video_track().map(|t| t.device_id().to_string());
        let session = Self {
            id,
            participants,
            is_active: true,
            local_stream: Some(local_stream),
            remote_stream: None,
            is_audio_only: false,
            current_audio_device_id,
            current_video_device_id,
            current_audio_output_id: None,
            created_at: Utc::now(),
        };
        session.recomputed()
    }

    /// Audio-only when our camera is not live, or the remote stream has no video
    #[must_use]
    pub fn compute_audio_only(
        local: Option<&MediaStream>,
        remote: Option<&RemoteStream>,
    ) -> bool {
        let local_video = local.is_some_and(MediaStream::has_live_video);
        let remote_missing_video = remote.is_some_and(|r| !r.has_video());
        !local_video || remote_missing_video
    }

    /// Copy with `is_audio_only` brought up to date
    #[must_use]
    pub fn recomputed(mut self) -> Self {
        self.is_audio_only =
            Self::compute_audio_only(self.local_stream.as_ref(), self.remote_stream.as_ref());
        self
    }
}

/// Offer waiting for the user
#[derive(Debug, Clone, PartialEq)]
pub struct PendingIncomingCall {
    /// Always true while a record exists
    pub is_incoming: bool,
    /// The offer as received
    pub offer: Option<SignalMessage>,
    /// Arrival time
    pub received_at: DateTime<Utc>,
}

impl PendingIncomingCall {
    /// Record a received offer
    #[must_use]
    pub fn from_offer(offer: SignalMessage) -> Self {
        Self {
            is_incoming: true,
            offer: Some(offer),
            received_at: Utc::now(),
        }
    }

    /// Call the offer belongs to
    #[must_use]
    pub fn call_id(&self) -> Option<CallId> {
        self.offer.as_ref().map(|o| o.call_id)
    }
}

/// Shared observable state of one call manager
///
/// Cheap to clone; clones observe the same values. Inject one store per
/// participant so several managers can run in one process.
#[derive(Debug, Clone)]
pub struct CallStore {
    session: Arc<Observable<Option<CallSession>>>,
    pending: Arc<Observable<Option<PendingIncomingCall>>>,
    state: Arc<Observable<CallState>>,
}

impl Default for CallStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStore {
    /// Empty store in `Idle`
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: Arc::new(Observable::new(None)),
            pending: Arc::new(Observable::new(None)),
            state: Arc::new(Observable::new(CallState::Idle)),
        }
    }

    /// Current session
    #[must_use]
    pub fn session(&self) -> Option<CallSession> {
        self.session.get()
    }

    /// Watch the session
    #[must_use]
    pub fn watch_session(&self) -> watch::Receiver<Option<CallSession>> {
        self.session.subscribe()
    }

    /// Current pending offer
    #[must_use]
    pub fn pending(&self) -> Option<PendingIncomingCall> {
        self.pending.get()
    }

    /// Watch the pending offer
    #[must_use]
    pub fn watch_pending(&self) -> watch::Receiver<Option<PendingIncomingCall>> {
        self.pending.subscribe()
    }

    /// Current negotiation state
    #[must_use]
    pub fn state(&self) -> CallState {
        self.state.get()
    }

    /// Watch the negotiation state
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    pub(crate) fn set_session(&self, session: Option<CallSession>) {
        self.session.set(session.map(CallSession::recomputed));
    }

    pub(crate) fn set_pending(&self, pending: Option<PendingIncomingCall>) {
        self.pending.set(pending);
    }

    pub(crate) fn set_state(&self, state: CallState) {
        self.state.set(state);
    }
}
