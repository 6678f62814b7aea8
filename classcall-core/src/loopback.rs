//! Deterministic in-process peer backend
//!
//! Sessions never exchange packets. The SDP is a short text listing the
//! sender's outbound tracks, gathering produces a fixed number of host
//! candidates, and a session reports `connected` once both descriptions are
//! applied and at least one well-formed remote candidate has been added.
//! [`LoopbackNetwork::sever`] fails every open session.

use crate::media::{MediaTrack, RemoteTrack};
use crate::peer::{
    PeerConnectionState, PeerError, PeerEvent, PeerEventSink, PeerSession, PeerSessionConfig,
    PeerSessionFactory,
};
use crate::types::{IceCandidate, MediaKind, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

const DEFAULT_CANDIDATE_COUNT: usize = 3;
const BASE_PORT: u16 = 50_000;

#[derive(Debug)]
struct NetworkInner {
    severed: Arc<AtomicBool>,
    next_port: AtomicU16,
    candidate_count: usize,
    sessions: Mutex<Vec<Arc<LoopbackPeerSession>>>,
}

/// Shared simulated network
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    /// Network gathering three candidates per session
    #[must_use]
    pub fn new() -> Self {
        Self::with_candidate_count(DEFAULT_CANDIDATE_COUNT)
    }

    /// Network gathering `count` candidates per session
    #[must_use]
    pub fn with_candidate_count(count: usize) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                severed: Arc::new(AtomicBool::new(false)),
                next_port: AtomicU16::new(BASE_PORT),
                candidate_count: count,
                sessions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Factory whose sessions are labelled `owner`
    #[must_use]
    pub fn factory(&self, owner: &str) -> LoopbackPeerFactory {
        LoopbackPeerFactory {
            network: self.inner.clone(),
            owner: owner.to_string(),
        }
    }

    /// Fail every open session and any session that connects afterwards
    pub fn sever(&self) {
        self.inner.severed.store(true, Ordering::Release);
        for session in self.inner.sessions.lock().iter() {
            session.fail();
        }
    }

    /// Let new sessions connect again
    pub fn restore(&self) {
        self.inner.severed.store(false, Ordering::Release);
    }

    /// Every session created so far, oldest first
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<LoopbackPeerSession>> {
        self.inner.sessions.lock().clone()
    }

    /// Sessions created by `owner`'s factory, oldest first
    #[must_use]
    pub fn sessions_of(&self, owner: &str) -> Vec<Arc<LoopbackPeerSession>> {
        self.inner
            .sessions
            .lock()
            .iter()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect()
    }
}

/// [`PeerSessionFactory`] for a [`LoopbackNetwork`]
#[derive(Debug, Clone)]
pub struct LoopbackPeerFactory {
    network: Arc<NetworkInner>,
    owner: String,
}

#[async_trait]
impl PeerSessionFactory for LoopbackPeerFactory {
    async fn create(
        &self,
        _config: &PeerSessionConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerSession>, PeerError> {
        let port = self.network.next_port.fetch_add(10, Ordering::AcqRel);
        let session = Arc::new(LoopbackPeerSession {
            owner: self.owner.clone(),
            endpoint: format!("{}-{}", self.owner, port),
            port,
            severed: self.network.severed.clone(),
            candidate_count: self.network.candidate_count,
            events,
            state: Mutex::new(LoopbackState::default()),
        });
        self.network.sessions.lock().push(session.clone());
        tracing::debug!(endpoint = %session.endpoint, call_id = %session.events.call_id(), "Created loopback session");
        Ok(session)
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    outbound: BTreeMap<MediaKind, MediaTrack>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: usize,
    rejected: usize,
    connection: Option<PeerConnectionState>,
    closed: bool,
}

/// One simulated peer connection
#[derive(Debug)]
pub struct LoopbackPeerSession {
    owner: String,
    endpoint: String,
    port: u16,
    severed: Arc<AtomicBool>,
    candidate_count: usize,
    events: PeerEventSink,
    state: Mutex<LoopbackState>,
}

impl LoopbackPeerSession {
    /// Label of the factory that created the session
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Unique endpoint name, also the SDP origin
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Remote candidates accepted
    #[must_use]
    pub fn applied_candidates(&self) -> usize {
        self.state.lock().applied
    }

    /// Remote candidates refused
    #[must_use]
    pub fn rejected_candidates(&self) -> usize {
        self.state.lock().rejected
    }

    /// Track currently sent for `kind`
    #[must_use]
    pub fn outbound_track(&self, kind: MediaKind) -> Option<MediaTrack> {
        self.state.lock().outbound.get(&kind).cloned()
    }

    /// Last reported connection state
    #[must_use]
    pub fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().connection.unwrap_or(PeerConnectionState::New)
    }

    /// Whether [`PeerSession::close`] was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn fail(&self) {
        let mut state = self.state.lock();
        if state.closed || state.connection == Some(PeerConnectionState::Failed) {
            return;
        }
        self.set_connection(&mut state, PeerConnectionState::Failed);
    }

    fn set_connection(&self, state: &mut LoopbackState, next: PeerConnectionState) {
        if state.connection != Some(next) {
            state.connection = Some(next);
            tracing::debug!(endpoint = %self.endpoint, state = %next, "Loopback connection state");
            self.events.emit(PeerEvent::ConnectionState(next));
        }
    }

    fn progress(&self, state: &mut LoopbackState) {
        if state.local.is_none() || state.remote.is_none() {
            return;
        }
        if state.connection.is_none() {
            self.set_connection(state, PeerConnectionState::Connecting);
        }
        if state.connection == Some(PeerConnectionState::Connecting) && state.applied > 0 {
            let next = if self.severed.load(Ordering::Acquire) {
                PeerConnectionState::Failed
            } else {
                PeerConnectionState::Connected
            };
            self.set_connection(state, next);
        }
    }

    fn describe(&self, state: &LoopbackState) -> String {
        let mut sdp = format!("v=0\r\no=loopback {}\r\ns=stream-{}\r\n", self.endpoint, self.endpoint);
        for track in state.outbound.values() {
            sdp.push_str(&format!("m={} {}\r\n", track.kind(), track.id()));
        }
        sdp
    }

    fn ensure_open(state: &LoopbackState) -> Result<(), PeerError> {
        if state.closed {
            return Err(PeerError::Closed);
        }
        Ok(())
    }
}

/// Remote tracks listed in a loopback SDP
fn parse_description(sdp: &str) -> Result<Vec<RemoteTrack>, PeerError> {
    let mut lines = sdp.lines();
    if lines.next() != Some("v=0") {
        return Err(PeerError::InvalidDescription("missing version line".to_string()));
    }

    let mut stream_id = None;
    let mut tracks = Vec::new();
    for line in lines {
        if let Some(id) = line.strip_prefix("s=") {
            stream_id = Some(id.to_string());
        } else if let Some(media) = line.strip_prefix("m=") {
            let (kind, track_id) = media
                .split_once(' ')
                .ok_or_else(|| PeerError::InvalidDescription(format!("bad media line: {}", line)))?;
            let kind = match kind {
                "audio" => MediaKind::Audio,
                "video" => MediaKind::Video,
                other => {
                    return Err(PeerError::InvalidDescription(format!("unknown media kind: {}", other)))
                }
            };
            let stream_id = stream_id
                .clone()
                .ok_or_else(|| PeerError::InvalidDescription("media before session line".to_string()))?;
            tracks.push(RemoteTrack {
                id: track_id.to_string(),
                stream_id,
                kind,
            });
        }
    }
    Ok(tracks)
}

/// Accepts `candidate:<foundation> <component> <transport> <priority> <ip> <port> typ <type> ...`
fn check_candidate(candidate: &IceCandidate) -> Result<(), PeerError> {
    let line = &candidate.candidate;
    let invalid = || PeerError::InvalidCandidate(line.clone());

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 || !fields[0].starts_with("candidate:") || fields[6] != "typ" {
        return Err(invalid());
    }
    fields[3].parse::<u32>().map_err(|_| invalid())?;
    fields[4].parse::<std::net::IpAddr>().map_err(|_| invalid())?;
    fields[5].parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}

#[async_trait]
impl PeerSession for LoopbackPeerSession {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.outbound.insert(track.kind(), track.clone());
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: &MediaTrack) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        match state.outbound.get_mut(&kind) {
            Some(current) => {
                *current = track.clone();
                Ok(())
            }
            None => Err(PeerError::NoSender(kind)),
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        Ok(SessionDescription::offer(self.describe(&state)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        match &state.remote {
            Some(remote) if remote.sdp_type == SdpType::Offer => {
                Ok(SessionDescription::answer(self.describe(&state)))
            }
            _ => Err(PeerError::NoRemoteDescription),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.local = Some(desc);

        for i in 0..self.candidate_count {
            let port = self.port.saturating_add(u16::try_from(i).unwrap_or(0));
            let priority = 2_130_706_431u32.saturating_sub(u32::try_from(i).unwrap_or(0));
            self.events.emit(PeerEvent::LocalCandidate(Some(IceCandidate {
                candidate: format!(
                    "candidate:{} 1 udp {} 127.0.0.1 {} typ host",
                    i + 1,
                    priority,
                    port
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            })));
        }
        self.events.emit(PeerEvent::LocalCandidate(None));

        self.progress(&mut state);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let tracks = parse_description(&desc.sdp)?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.remote = Some(desc);
        for track in tracks {
            self.events.emit(PeerEvent::RemoteTrack(track));
        }
        self.progress(&mut state);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.remote.is_none() {
            return Err(PeerError::NoRemoteDescription);
        }
        if let Err(e) = check_candidate(&candidate) {
            state.rejected += 1;
            return Err(e);
        }
        state.applied += 1;
        self.progress(&mut state);
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.connection = Some(PeerConnectionState::Closed);
            tracing::debug!(endpoint = %self.endpoint, "Loopback session closed");
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "loopback"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::peer::CallInput;
    use crate::types::CallId;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<CallInput>) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        while let Ok(CallInput::Peer { event, .. }) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn candidates(events: &[PeerEvent]) -> Vec<IceCandidate> {
        events
            .iter()
            .filter_map(|e| match e {
                PeerEvent::LocalCandidate(Some(c)) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    async fn session(
        network: &LoopbackNetwork,
        owner: &str,
    ) -> (Arc<dyn PeerSession>, UnboundedReceiver<CallInput>) {
        let (sink, rx) = PeerEventSink::channel(CallId::new());
        let session = network
            .factory(owner)
            .create(&PeerSessionConfig::default(), sink)
            .await
            .unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn test_offer_answer_reaches_connected() {
        let network = LoopbackNetwork::new();
        let (caller, mut caller_rx) = session(&network, "alice").await;
        let (callee, mut callee_rx) = session(&network, "bob").await;

        caller
            .add_track(&MediaTrack::new(MediaKind::Video, "cam-1", "Cam"))
            .await
            .unwrap();
        callee
            .add_track(&MediaTrack::new(MediaKind::Audio, "mic-1", "Mic"))
            .await
            .unwrap();

        let offer = caller.create_offer().await.unwrap();
        caller.set_local_description(offer.clone()).await.unwrap();
        callee.set_remote_description(offer).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        callee.set_local_description(answer.clone()).await.unwrap();
        caller.set_remote_description(answer).await.unwrap();

        let caller_events = drain(&mut caller_rx);
        let callee_events = drain(&mut callee_rx);
        assert_eq!(candidates(&caller_events).len(), DEFAULT_CANDIDATE_COUNT);
        assert!(callee_events
            .iter()
            .any(|e| matches!(e, PeerEvent::RemoteTrack(t) if t.kind == MediaKind::Video)));
        assert!(caller_events
            .contains(&PeerEvent::ConnectionState(PeerConnectionState::Connecting)));

        for c in candidates(&callee_events) {
            caller.add_ice_candidate(c).await.unwrap();
        }
        assert!(drain(&mut caller_rx)
            .contains(&PeerEvent::ConnectionState(PeerConnectionState::Connected)));
    }

    #[tokio::test]
    async fn test_candidate_validation() {
        let network = LoopbackNetwork::new();
        let (session, _rx) = session(&network, "alice").await;
        let good = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        assert_eq!(
            session.add_ice_candidate(good.clone()).await,
            Err(PeerError::NoRemoteDescription)
        );

        session
            .set_remote_description(SessionDescription::offer("v=0\r\no=loopback x\r\ns=stream-x\r\n"))
            .await
            .unwrap();
        let bad = IceCandidate {
            candidate: "candidate:garbage".to_string(),
            ..good.clone()
        };
        assert!(matches!(
            session.add_ice_candidate(bad).await,
            Err(PeerError::InvalidCandidate(_))
        ));
        session.add_ice_candidate(good).await.unwrap();

        let loopback = &network.sessions_of("alice")[0];
        assert_eq!(loopback.applied_candidates(), 1);
        assert_eq!(loopback.rejected_candidates(), 1);
    }

    #[tokio::test]
    async fn test_replace_requires_sender() {
        let network = LoopbackNetwork::new();
        let (session, _rx) = session(&network, "alice").await;
        let cam = MediaTrack::new(MediaKind::Video, "cam-2", "Cam");
        assert_eq!(
            session.replace_track(MediaKind::Video, &cam).await,
            Err(PeerError::NoSender(MediaKind::Video))
        );

        session
            .add_track(&MediaTrack::new(MediaKind::Video, "cam-1", "Cam"))
            .await
            .unwrap();
        session.replace_track(MediaKind::Video, &cam).await.unwrap();
        assert_eq!(
            network.sessions()[0].outbound_track(MediaKind::Video),
            Some(cam)
        );
    }

    #[tokio::test]
    async fn test_sever_fails_open_sessions() {
        let network = LoopbackNetwork::new();
        let (session, mut rx) = session(&network, "alice").await;
        network.sever();
        assert!(drain(&mut rx).contains(&PeerEvent::ConnectionState(PeerConnectionState::Failed)));

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(
            session.create_offer().await,
            Err(PeerError::Closed)
        );
    }

    #[test]
    fn test_rejects_foreign_sdp() {
        assert!(parse_description("o=foo").is_err());
        assert!(parse_description("v=0\r\nm=video t1").is_err());
        let tracks = parse_description("v=0\r\no=loopback a\r\ns=s1\r\nm=audio t1\r\n").unwrap();
        assert_eq!(
            tracks,
            vec![RemoteTrack {
                id: "t1".to_string(),
                stream_id: "s1".to_string(),
                kind: MediaKind::Audio
            }]
        );
    }
}
