//! Call types and data structures

use crate::identity::ParticipantId;
use crate::media::AcquisitionNotice;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Create a new random call ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Microphone audio
    Audio,
    /// Camera video
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer from the caller
    Offer,
    /// Answer from the callee
    Answer,
}

/// Session description exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap an SDP offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Wrap an SDP answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// SDP media ID
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// SDP media line index
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Call state enumeration
///
/// ```text
///   Idle/Ended/Failed ──initiate──► Offering ──answer──► Connecting ──► Connected ──► Ended
///   Idle/Ended/Failed ──accept────► Answering ─────────► Connecting
///   Offering/Answering/Connecting/Connected ──failure──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// No call yet
    Idle,
    /// Offer sent, waiting for an answer
    Offering,
    /// Incoming offer accepted, answer being produced
    Answering,
    /// Descriptions exchanged, transport connecting
    Connecting,
    /// Media flowing
    Connected,
    /// Call ended normally
    Ended,
    /// Call failed
    Failed,
}

impl CallState {
    /// Whether a call is in progress in this state
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Offering | Self::Answering | Self::Connecting | Self::Connected
        )
    }

    /// Whether a new call may start from this state
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Ended | Self::Failed)
    }

    /// Check whether a transition follows the negotiation state machine
    #[must_use]
    pub fn can_transition_to(self, to: CallState) -> bool {
        match (self, to) {
            (from, Self::Offering | Self::Answering) => from.is_settled(),
            (Self::Offering | Self::Answering, Self::Connecting) => true,
            (Self::Connecting, Self::Connected) => true,
            (from, Self::Ended | Self::Failed) => from.is_active(),
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Offering => "offering",
            Self::Answering => "answering",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ended => "ended",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    /// A participant hung up
    Hangup,
    /// The callee declined the offer
    Declined,
    /// The callee was already in a call
    Busy,
    /// Nobody answered in time
    Timeout,
    /// The connection failed
    Failed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hangup => "hangup",
            Self::Declined => "declined",
            Self::Busy => "busy",
            Self::Timeout => "timeout",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Call event for notifications
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// Offer received and waiting for the user
    IncomingCall {
        /// Call identifier
        call_id: CallId,
        /// Who is calling
        caller: ParticipantId,
    },
    /// Pending offer expired or was withdrawn before an answer
    MissedCall {
        /// Call identifier
        call_id: CallId,
        /// Who was calling
        caller: ParticipantId,
    },
    /// Offer sent
    CallInitiated {
        /// Call identifier
        call_id: CallId,
        /// Who is being called
        callee: ParticipantId,
    },
    /// Incoming offer accepted locally
    CallAccepted {
        /// Call identifier
        call_id: CallId,
    },
    /// Incoming offer declined locally
    CallDeclined {
        /// Call identifier
        call_id: CallId,
    },
    /// State machine moved
    StateChanged {
        /// Call identifier, if a call was current
        call_id: Option<CallId>,
        /// New state
        state: CallState,
    },
    /// Peer connection reached connected
    ConnectionEstablished {
        /// Call identifier
        call_id: CallId,
    },
    /// Remote track arrived
    RemoteTrackAdded {
        /// Call identifier
        call_id: CallId,
        /// Track kind
        kind: MediaKind,
    },
    /// Local capture degraded or needs the user's attention
    MediaNotice {
        /// Call identifier
        call_id: CallId,
        /// What happened
        notice: AcquisitionNotice,
    },
    /// Outbound device replaced during a call
    DeviceSwitched {
        /// Call identifier
        call_id: CallId,
        /// Kind of the replaced track, `None` for audio output
        kind: Option<MediaKind>,
        /// New device
        device_id: String,
    },
    /// Call over
    CallEnded {
        /// Call identifier
        call_id: CallId,
        /// Why it ended
        reason: EndReason,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id() {
        let id1 = CallId::new();
        let id2 = CallId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_valid_transitions() {
        use CallState::*;
        assert!(Idle.can_transition_to(Offering));
        assert!(Idle.can_transition_to(Answering));
        assert!(Ended.can_transition_to(Offering));
        assert!(Failed.can_transition_to(Answering));
        assert!(Offering.can_transition_to(Connecting));
        assert!(Answering.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Ended));
        assert!(Offering.can_transition_to(Failed));
        assert!(Connecting.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Failed));
    }

    #[test]
    fn test_invalid_transitions() {
        use CallState::*;
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Idle.can_transition_to(Ended));
        assert!(!Offering.can_transition_to(Offering));
        assert!(!Offering.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Offering));
        assert!(!Ended.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Connected));
    }

    #[test]
    fn test_ice_candidate_wire_names() {
        let c = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_session_description_wire_names() {
        let d = SessionDescription::answer("v=0");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], "v=0");
    }
}
