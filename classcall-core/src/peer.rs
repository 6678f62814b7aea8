//! Peer connection abstraction
//!
//! A [`PeerSession`] is the negotiation object for one call. Backends report
//! asynchronous happenings (gathered candidates, connection state, remote
//! tracks) through a [`PeerEventSink`], which tags them with the call id so
//! the state machine can drop events from a call that is already gone.

use crate::config::IceServerConfig;
use crate::media::{MediaTrack, RemoteTrack};
use crate::types::{CallId, IceCandidate, MediaKind, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Peer connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// Session already closed
    #[error("Peer session closed")]
    Closed,

    /// Candidate arrived before any remote description
    #[error("No remote description set")]
    NoRemoteDescription,

    /// Description could not be applied
    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    /// Candidate could not be parsed or applied
    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    /// No outbound sender of this kind to replace
    #[error("No {0} sender on this session")]
    NoSender(MediaKind),

    /// Backend failure
    #[error("Peer backend error: {0}")]
    Backend(String),
}

/// Transport-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    /// Created, nothing negotiated
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media path up
    Connected,
    /// Temporarily lost; may recover
    Disconnected,
    /// Gave up
    Failed,
    /// Closed locally
    Closed,
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Backend notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Local candidate gathered; `None` once gathering is complete
    LocalCandidate(Option<IceCandidate>),
    /// Connection state changed
    ConnectionState(PeerConnectionState),
    /// Remote track arrived
    RemoteTrack(RemoteTrack),
}

/// Internal input for the call state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInput {
    /// Event from a peer session
    Peer {
        /// Call the session belongs to
        call_id: CallId,
        /// What happened
        event: PeerEvent,
    },
    /// Pending incoming offer was not answered in time
    IncomingExpired(CallId),
    /// Outgoing offer was not answered in time
    OfferExpired(CallId),
}

/// Where a backend sends its events
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    call_id: CallId,
    tx: mpsc::UnboundedSender<CallInput>,
}

impl PeerEventSink {
    /// Sink for one call
    #[must_use]
    pub fn new(call_id: CallId, tx: mpsc::UnboundedSender<CallInput>) -> Self {
        Self { call_id, tx }
    }

    /// Standalone sink and its receiver
    #[must_use]
    pub fn channel(call_id: CallId) -> (Self, mpsc::UnboundedReceiver<CallInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(call_id, tx), rx)
    }

    /// Call the sink is tagged with
    #[must_use]
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Forward an event; dropped silently once the state machine is gone
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send(CallInput::Peer {
            call_id: self.call_id,
            event,
        });
    }
}

/// Settings for a new peer session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSessionConfig {
    /// STUN/TURN servers
    pub ice_servers: Vec<IceServerConfig>,
}

/// Negotiation object for one call
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Attach an outbound track
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError>;

    /// Swap the outbound track of `kind` without renegotiating
    async fn replace_track(&self, kind: MediaKind, track: &MediaTrack) -> Result<(), PeerError>;

    /// Produce an offer
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    /// Produce an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    /// Apply our own description; starts candidate gathering
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Apply the remote party's description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Apply a remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    /// Tear down; idempotent
    async fn close(&self) -> Result<(), PeerError>;

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}

/// Creates peer sessions
#[async_trait]
pub trait PeerSessionFactory: Send + Sync {
    /// New session reporting to `events`
    async fn create(
        &self,
        config: &PeerSessionConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerSession>, PeerError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_tags_events() {
        let call_id = CallId::new();
        let (sink, mut rx) = PeerEventSink::channel(call_id);
        sink.emit(PeerEvent::ConnectionState(PeerConnectionState::Connecting));

        assert_eq!(
            rx.recv().await.unwrap(),
            CallInput::Peer {
                call_id,
                event: PeerEvent::ConnectionState(PeerConnectionState::Connecting),
            }
        );
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = PeerEventSink::channel(CallId::new());
        drop(rx);
        sink.emit(PeerEvent::LocalCandidate(None));
    }
}
