//! classcall - two-party call control for the classroom app
//!
//! This library drives one-to-one video calls between classroom participants.
//! Signaling rides on a shared publish/subscribe topic and media flows over a
//! pluggable peer connection backend. It features:
//!
//! - **Graceful Device Access**: Missing, busy or denied cameras and
//!   microphones degrade the call instead of failing it
//! - **Topic Signaling**: Offer, answer, candidates and hang-up over one
//!   broadcast topic, with automatic resubscription
//! - **Negotiation State Machine**: Offer/answer/ICE with early-candidate
//!   buffering, busy replies and offer timeouts
//! - **Live Device Switching**: Swap microphone, camera or speaker mid-call
//!   without renegotiating
//! - **Observable State**: Session, pending offer and call state published
//!   through watch channels for the UI
//!
//! # Examples
//!
//! ```rust,no_run
//! use classcall_core::{CallService, LoopbackNetwork, MemoryHub, ParticipantId, SyntheticMediaDevices};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let hub = MemoryHub::new();
//! let network = LoopbackNetwork::new();
//!
//! let service = CallService::builder(ParticipantId::new("teacher-1")?, Arc::new(hub.client()))
//!     .with_media_devices(Arc::new(SyntheticMediaDevices::with_default_devices()))
//!     .with_peer_factory(Arc::new(network.factory("teacher-1")))
//!     .build()?;
//!
//! service.start().await?;
//! let call_id = service.call(ParticipantId::new("student-7")?).await?;
//! # let _ = call_id;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Core call types and data structures
pub mod types;

/// Participant identity
pub mod identity;

/// Configuration and defaults
pub mod config;

/// Device enumeration and capture with fallback
pub mod media;

/// Simulated capture devices
pub mod synthetic;

/// Signaling transports
pub mod transport;

/// Signaling wire format and channel
pub mod signaling;

/// Peer connection abstraction
pub mod peer;

/// Deterministic in-process peer backend
pub mod loopback;

/// Peer backend on the webrtc crate
#[cfg(feature = "webrtc-backend")]
pub mod webrtc_peer;

/// Observable call state
pub mod session;

/// Call negotiation state machine
pub mod call;

/// Device switching during a call
mod switching;

/// Incoming-call notification
pub mod incoming;

/// Service composition root
pub mod service;

// Re-export main types at crate root
pub use call::{CallError, CallManager, CallManagerDeps};
pub use config::{CallConfig, ConfigError, IceServerConfig, SignalingConfig};
pub use identity::{IdentityError, ParticipantId, Participants};
pub use incoming::{IncomingCallNotifier, Ringer, TracingRinger};
pub use loopback::{LoopbackNetwork, LoopbackPeerFactory, LoopbackPeerSession};
pub use media::{
    Acquisition, AcquisitionNotice, AudioOutput, CaptureError, CaptureErrorKind, DeviceAccess,
    DeviceKind, MediaDeviceInfo, MediaDevices, MediaError, MediaStream, MediaTrack, RemoteStream,
    RemoteTrack,
};
pub use peer::{
    PeerConnectionState, PeerError, PeerEvent, PeerEventSink, PeerSession, PeerSessionConfig,
    PeerSessionFactory,
};
pub use service::{CallService, CallServiceBuilder, ServiceError};
pub use session::{CallSession, CallStore, PendingIncomingCall};
pub use signaling::{Signal, SignalKind, SignalMessage, SignalingChannel, SignalingError, SignalingTransport};
pub use synthetic::SyntheticMediaDevices;
pub use transport::{MemoryHub, MemoryTransport, TransportError};
pub use types::*;
#[cfg(feature = "webrtc-backend")]
pub use webrtc_peer::{WebRtcPeerFactory, WebRtcPeerSession};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::call::{CallError, CallManager};
    pub use crate::config::CallConfig;
    pub use crate::identity::ParticipantId;
    pub use crate::incoming::IncomingCallNotifier;
    pub use crate::media::{DeviceKind, MediaDevices, MediaStream};
    pub use crate::service::{CallService, CallServiceBuilder};
    pub use crate::session::{CallSession, CallStore};
    pub use crate::signaling::SignalingTransport;
    pub use crate::types::{CallEvent, CallId, CallState, EndReason, MediaKind};
}
