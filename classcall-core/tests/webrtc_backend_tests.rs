//! Integration tests for the webrtc peer backend
//!
//! Two sessions in one process negotiate against each other: descriptions
//! are exchanged directly and gathered candidates are forwarded by hand.

#![cfg(feature = "webrtc-backend")]

use classcall_core::peer::CallInput;
use classcall_core::{
    CallId, IceCandidate, MediaKind, MediaTrack, PeerError, PeerEvent, PeerEventSink, PeerSession,
    PeerSessionConfig, WebRtcPeerSession,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use webrtc::track::track_local::TrackLocal;

async fn session() -> (WebRtcPeerSession, UnboundedReceiver<CallInput>) {
    let (sink, rx) = PeerEventSink::channel(CallId::new());
    let config = PeerSessionConfig {
        ice_servers: Vec::new(),
    };
    let session = WebRtcPeerSession::new(&config, sink).await.unwrap();
    (session, rx)
}

fn mic(id: &str) -> MediaTrack {
    MediaTrack::new(MediaKind::Audio, id, "Built-in Microphone")
}

fn camera(id: &str) -> MediaTrack {
    MediaTrack::new(MediaKind::Video, id, "Integrated Camera")
}

// ============================================================================
// Negotiation
// ============================================================================

#[tokio::test]
async fn test_offer_answer_and_candidate_exchange() {
    let (caller, mut caller_events) = session().await;
    let (callee, mut callee_events) = session().await;

    caller.add_track(&mic("mic-a")).await.unwrap();
    caller.add_track(&camera("cam-a")).await.unwrap();
    callee.add_track(&mic("mic-b")).await.unwrap();

    let offer = caller.create_offer().await.unwrap();
    assert!(offer.sdp.contains("m=audio"));
    assert!(offer.sdp.contains("m=video"));
    caller.set_local_description(offer.clone()).await.unwrap();
    callee.set_remote_description(offer).await.unwrap();

    let answer = callee.create_answer().await.unwrap();
    callee.set_local_description(answer.clone()).await.unwrap();
    caller.set_remote_description(answer).await.unwrap();

    let mut caller_done = false;
    let mut callee_done = false;
    let exchange = async {
        while !(caller_done && callee_done) {
            tokio::select! {
                Some(input) = caller_events.recv() => {
                    if let CallInput::Peer { event: PeerEvent::LocalCandidate(candidate), .. } = input {
                        match candidate {
                            Some(candidate) => callee.add_ice_candidate(candidate).await.unwrap(),
                            None => caller_done = true,
                        }
                    }
                }
                Some(input) = callee_events.recv() => {
                    if let CallInput::Peer { event: PeerEvent::LocalCandidate(candidate), .. } = input {
                        match candidate {
                            Some(candidate) => caller.add_ice_candidate(candidate).await.unwrap(),
                            None => callee_done = true,
                        }
                    }
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(15), exchange)
        .await
        .expect("candidate gathering never completed");

    caller.close().await.unwrap();
    callee.close().await.unwrap();
}

#[tokio::test]
async fn test_candidate_before_remote_description() {
    let (session, _events) = session().await;
    let candidate = IceCandidate {
        candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    };
    assert_eq!(
        session.add_ice_candidate(candidate).await.unwrap_err(),
        PeerError::NoRemoteDescription
    );
}

// ============================================================================
// Outbound tracks
// ============================================================================

#[tokio::test]
async fn test_replace_track_swaps_sample_track() {
    let (session, _events) = session().await;
    let first = camera("cam-1");
    let second = camera("cam-2");
    session.add_track(&first).await.unwrap();
    assert_eq!(session.sample_track(MediaKind::Video).unwrap().id(), first.id());

    session.replace_track(MediaKind::Video, &second).await.unwrap();
    assert_eq!(session.sample_track(MediaKind::Video).unwrap().id(), second.id());
    assert!(session.sample_track(MediaKind::Audio).is_none());

    assert_eq!(
        session
            .replace_track(MediaKind::Audio, &mic("mic-1"))
            .await
            .unwrap_err(),
        PeerError::NoSender(MediaKind::Audio)
    );
}

#[tokio::test]
async fn test_write_sample_needs_a_track() {
    let (session, _events) = session().await;
    session.add_track(&mic("mic-1")).await.unwrap();

    let opus_silence = [0xf8, 0xff, 0xfe];
    session
        .write_sample(MediaKind::Audio, &opus_silence, Duration::from_millis(20))
        .await
        .unwrap();
    assert_eq!(
        session
            .write_sample(MediaKind::Video, &opus_silence, Duration::from_millis(33))
            .await
            .unwrap_err(),
        PeerError::NoSender(MediaKind::Video)
    );

    session.close().await.unwrap();
    assert!(session.sample_track(MediaKind::Audio).is_none());
}
