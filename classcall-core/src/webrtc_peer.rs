//! Peer sessions backed by the `webrtc` crate
//!
//! Local tracks are registered as sample tracks (Opus for audio, VP8 for
//! video). The capture pipeline pushes encoded frames through
//! [`WebRtcPeerSession::write_sample`] or the handle returned by
//! [`WebRtcPeerSession::sample_track`]; a replaced track takes over the slot.

use crate::media::{MediaTrack, RemoteTrack};
use crate::peer::{
    PeerConnectionState, PeerError, PeerEvent, PeerEventSink, PeerSession, PeerSessionConfig,
    PeerSessionFactory,
};
use crate::types::{IceCandidate, MediaKind, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

fn backend_error(context: &str, e: impl std::fmt::Display) -> PeerError {
    PeerError::Backend(format!("{context}: {e}"))
}

fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn ice_servers(config: &PeerSessionConfig) -> Vec<RTCIceServer> {
    config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Creates [`WebRtcPeerSession`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    /// New factory
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerSessionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        config: &PeerSessionConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerSession>, PeerError> {
        let session = WebRtcPeerSession::new(config, events).await?;
        Ok(Arc::new(session))
    }
}

/// One `RTCPeerConnection` plus its outbound senders and sample tracks
pub struct WebRtcPeerSession {
    pc: Arc<RTCPeerConnection>,
    stream_id: String,
    senders: Mutex<HashMap<MediaKind, Arc<RTCRtpSender>>>,
    tracks: Mutex<HashMap<MediaKind, Arc<TrackLocalStaticSample>>>,
}

impl WebRtcPeerSession {
    /// Build the connection and wire its callbacks into `events`
    ///
    /// # Errors
    ///
    /// Returns error if the codec registry or the connection cannot be built
    pub async fn new(config: &PeerSessionConfig, events: PeerEventSink) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| backend_error("Failed to register codecs", e))?;
        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| backend_error("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| backend_error("Failed to create peer connection", e))?,
        );

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => sink.emit(PeerEvent::LocalCandidate(Some(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }))),
                        Err(e) => tracing::warn!(error = %e, "Could not serialize local candidate"),
                    },
                    None => sink.emit(PeerEvent::LocalCandidate(None)),
                }
            })
        }));

        let sink = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::debug!(call_id = %sink.call_id(), "Peer connection state: {}", state);
            if let Some(state) = map_state(state) {
                sink.emit(PeerEvent::ConnectionState(state));
            }
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(MediaKind::Audio),
                RTPCodecType::Video => Some(MediaKind::Video),
                RTPCodecType::Unspecified => None,
            };
            if let Some(kind) = kind {
                sink.emit(PeerEvent::RemoteTrack(RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                }));
            }
            Box::pin(async {})
        }));

        Ok(Self {
            pc,
            stream_id: format!("classcall-{}", events.call_id()),
            senders: Mutex::new(HashMap::new()),
            tracks: Mutex::new(HashMap::new()),
        })
    }

    /// Outbound sample track currently sending `kind`
    #[must_use]
    pub fn sample_track(&self, kind: MediaKind) -> Option<Arc<TrackLocalStaticSample>> {
        self.tracks.lock().get(&kind).cloned()
    }

    /// Push one encoded frame on the outbound track of `kind`
    ///
    /// # Errors
    ///
    /// Returns error if no track of `kind` is attached or the write fails
    pub async fn write_sample(&self, kind: MediaKind, data: &[u8], duration: Duration) -> Result<(), PeerError> {
        let track = self.sample_track(kind).ok_or(PeerError::NoSender(kind))?;
        let sample = Sample {
            data: bytes::Bytes::copy_from_slice(data),
            duration,
            ..Default::default()
        };
        track
            .write_sample(&sample)
            .await
            .map_err(|e| backend_error("Failed to write sample", e))
    }

    fn local_track(&self, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind()),
            track.id().to_string(),
            self.stream_id.clone(),
        ))
    }

    fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
        let result = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        result.map_err(|e| PeerError::InvalidDescription(e.to_string()))
    }
}

#[async_trait]
impl PeerSession for WebRtcPeerSession {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        let local = self.local_track(track);
        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| backend_error("Failed to add track", e))?;
        self.senders.lock().insert(track.kind(), sender);
        self.tracks.lock().insert(track.kind(), local);
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: &MediaTrack) -> Result<(), PeerError> {
        let sender = self
            .senders
            .lock()
            .get(&kind)
            .cloned()
            .ok_or(PeerError::NoSender(kind))?;
        let local = self.local_track(track);
        sender
            .replace_track(Some(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| backend_error("Failed to replace track", e))?;
        self.tracks.lock().insert(kind, local);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| backend_error("Failed to create offer", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| backend_error("Failed to create answer", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let desc = Self::to_rtc(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| PeerError::InvalidDescription(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let desc = Self::to_rtc(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| PeerError::InvalidDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        if self.pc.remote_description().await.is_none() {
            return Err(PeerError::NoRemoteDescription);
        }
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerError::InvalidCandidate(e.to_string()))
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.senders.lock().clear();
        self.tracks.lock().clear();
        self.pc
            .close()
            .await
            .map_err(|e| backend_error("Failed to close peer connection", e))
    }

    fn backend_type(&self) -> &'static str {
        "webrtc"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::IceServerConfig;

    #[test]
    fn test_codecs_per_kind() {
        assert_eq!(codec_for(MediaKind::Audio).mime_type, MIME_TYPE_OPUS);
        assert_eq!(codec_for(MediaKind::Audio).clock_rate, 48000);
        assert_eq!(codec_for(MediaKind::Video).mime_type, MIME_TYPE_VP8);
        assert_eq!(codec_for(MediaKind::Video).clock_rate, 90000);
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            map_state(RTCPeerConnectionState::Connected),
            Some(PeerConnectionState::Connected)
        );
        assert_eq!(
            map_state(RTCPeerConnectionState::Failed),
            Some(PeerConnectionState::Failed)
        );
        assert_eq!(map_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[test]
    fn test_ice_server_credentials() {
        let config = PeerSessionConfig {
            ice_servers: vec![IceServerConfig {
                urls: vec!["turn:turn.example.org:3478".to_string()],
                username: Some("user".to_string()),
                credential: None,
            }],
        };
        let servers = ice_servers(&config);
        assert_eq!(servers[0].urls, vec!["turn:turn.example.org:3478"]);
        assert_eq!(servers[0].username, "user");
        assert!(servers[0].credential.is_empty());
    }
}
