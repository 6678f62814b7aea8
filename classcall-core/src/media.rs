//! Device access layer
//!
//! Wraps the platform capture primitive ([`MediaDevices`]) and turns its
//! failures into a usable, possibly degraded, local stream. Degradation is
//! driven by [`FALLBACK_POLICY`], a table keyed by what was requested and how
//! it failed; [`resolve_fallback`] is the only place that reads it.

use crate::config::{AudioPreferences, FacingMode, VideoPreferences};
use crate::types::MediaKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Media-related errors
#[derive(Error, Debug)]
pub enum MediaError {
    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Capture failed
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// Output routing failed
    #[error("Audio output error: {0}")]
    Output(String),
}

/// Failure classes reported by the capture primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureErrorKind {
    /// User or platform refused access
    PermissionDenied,
    /// No device matches the request
    NotFound,
    /// Device exists but is held by another application
    NotReadable,
    /// Constraints cannot be satisfied by any device
    Overconstrained,
    /// Capture was interrupted
    Aborted,
    /// Anything else
    Unknown,
}

impl fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PermissionDenied => "permission-denied",
            Self::NotFound => "not-found",
            Self::NotReadable => "not-readable",
            Self::Overconstrained => "overconstrained",
            Self::Aborted => "aborted",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Error returned by [`MediaDevices`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CaptureError {
    /// Failure class
    pub kind: CaptureErrorKind,
    /// Platform message
    pub message: String,
}

impl CaptureError {
    /// Create a capture error
    pub fn new(kind: CaptureErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Device category as reported by enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Microphone
    AudioInput,
    /// Camera
    VideoInput,
    /// Speaker or headset
    AudioOutput,
}

impl DeviceKind {
    /// Capture kind for input devices
    #[must_use]
    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            Self::AudioInput => Some(MediaKind::Audio),
            Self::VideoInput => Some(MediaKind::Video),
            Self::AudioOutput => None,
        }
    }
}

impl From<MediaKind> for DeviceKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Self::AudioInput,
            MediaKind::Video => Self::VideoInput,
        }
    }
}

/// Enumerated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDeviceInfo {
    /// Stable device identifier
    pub device_id: String,
    /// Human-readable label, empty until permission is granted
    pub label: String,
    /// Device category
    pub kind: DeviceKind,
}

/// Per-track capture constraints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackConstraints {
    /// Exact device to open
    pub device_id: Option<String>,
    /// Preferred camera
    pub facing_mode: Option<FacingMode>,
    /// Echo cancellation
    pub echo_cancellation: Option<bool>,
    /// Noise suppression
    pub noise_suppression: Option<bool>,
    /// Automatic gain control
    pub auto_gain_control: Option<bool>,
    /// Sample rate in Hz
    pub sample_rate: Option<u32>,
    /// Width in pixels
    pub width: Option<u32>,
    /// Height in pixels
    pub height: Option<u32>,
}

/// Capture request; `None` means the kind is not requested
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Microphone constraints
    pub audio: Option<TrackConstraints>,
    /// Camera constraints
    pub video: Option<TrackConstraints>,
}

impl CaptureRequest {
    /// Constraints for `kind`, if requested
    #[must_use]
    pub fn constraints(&self, kind: MediaKind) -> Option<&TrackConstraints> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }
}

#[derive(Debug)]
struct TrackFlags {
    live: AtomicBool,
    enabled: AtomicBool,
}

/// Local capture track
///
/// Clones share the same live/enabled flags, so stopping any clone stops the
/// track everywhere it is attached.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: MediaKind,
    device_id: String,
    label: String,
    flags: Arc<TrackFlags>,
}

impl MediaTrack {
    /// Create a live, enabled track for a device
    pub fn new(kind: MediaKind, device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: format!("{}-{}", kind, Uuid::new_v4()),
            kind,
            device_id: device_id.into(),
            label: label.into(),
            flags: Arc::new(TrackFlags {
                live: AtomicBool::new(true),
                enabled: AtomicBool::new(true),
            }),
        }
    }

    /// Track identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Track kind
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Source device
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Source device label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the track still produces media
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.flags.live.load(Ordering::Acquire)
    }

    /// Release the device; irreversible
    pub fn stop(&self) {
        if self.flags.live.swap(false, Ordering::AcqRel) {
            tracing::debug!(track_id = %self.id, device_id = %self.device_id, "Track stopped");
        }
    }

    /// Whether the track is unmuted
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.flags.enabled.load(Ordering::Acquire)
    }

    /// Mute or unmute without releasing the device
    pub fn set_enabled(&self, enabled: bool) {
        self.flags.enabled.store(enabled, Ordering::Release);
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaTrack {}

/// Local stream, possibly empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Stream holding `tracks`
    #[must_use]
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// Stream with no tracks, used for limited calls
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Stream identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks
    #[must_use]
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// First track of `kind`
    #[must_use]
    pub fn track(&self, kind: MediaKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Microphone track
    #[must_use]
    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.track(MediaKind::Audio)
    }

    /// Camera track
    #[must_use]
    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.track(MediaKind::Video)
    }

    /// Whether the stream carries a live camera track
    #[must_use]
    pub fn has_live_video(&self) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind() == MediaKind::Video && t.is_live())
    }

    /// Whether the stream has no tracks at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop every track
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Combine with the tracks of another stream
    #[must_use]
    pub fn merged(mut self, other: MediaStream) -> Self {
        self.tracks.extend(other.tracks);
        self
    }

    /// Copy of this stream with the `kind` track swapped for `track`
    #[must_use]
    pub fn with_track(&self, track: MediaTrack) -> Self {
        let mut tracks: Vec<MediaTrack> = self
            .tracks
            .iter()
            .filter(|t| t.kind() != track.kind())
            .cloned()
            .collect();
        tracks.push(track);
        Self {
            id: self.id.clone(),
            tracks,
        }
    }
}

/// Track received from the remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Track identifier
    pub id: String,
    /// Remote stream the track belongs to
    pub stream_id: String,
    /// Track kind
    pub kind: MediaKind,
}

/// Remote stream assembled from [`RemoteTrack`]s
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    /// Stream identifier
    pub id: String,
    /// Received tracks
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    /// Stream for the first track seen under an id
    #[must_use]
    pub fn from_track(track: RemoteTrack) -> Self {
        Self {
            id: track.stream_id.clone(),
            tracks: vec![track],
        }
    }

    /// Copy with `track` added, replacing a track with the same id
    #[must_use]
    pub fn with_track(&self, track: RemoteTrack) -> Self {
        let mut tracks: Vec<RemoteTrack> = self
            .tracks
            .iter()
            .filter(|t| t.id != track.id)
            .cloned()
            .collect();
        tracks.push(track);
        Self {
            id: self.id.clone(),
            tracks,
        }
    }

    /// Whether a video track has arrived
    #[must_use]
    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == MediaKind::Video)
    }
}

/// Platform capture primitive
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// List devices; labels may be empty before permission is granted
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, CaptureError>;

    /// Open the requested devices as one stream
    async fn get_user_media(&self, request: &CaptureRequest) -> Result<MediaStream, CaptureError>;
}

/// Playback element for the remote stream
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Whether the platform can route playback to a chosen device
    fn supports_output_selection(&self) -> bool;

    /// Route playback to `device_id`
    async fn set_output_device(&self, device_id: &str) -> Result<(), MediaError>;
}

/// User-facing explanation of a degraded acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionNotice {
    /// No camera and no microphone present
    NoDevices,
    /// Video requested but no camera present
    CameraNotFound,
    /// Audio requested but no microphone present
    MicrophoneNotFound,
    /// Access refused
    PermissionDenied,
    /// Camera held by another application
    CameraBusy,
    /// Microphone held by another application
    MicrophoneBusy,
    /// Preferred constraints dropped to get a device
    ConstraintsRelaxed,
    /// Camera failed for another reason
    CameraFailed,
    /// Microphone failed for another reason
    MicrophoneFailed,
}

impl AcquisitionNotice {
    /// Notice for `kind` failing with `failure` on its own
    #[must_use]
    pub fn for_failure(kind: MediaKind, failure: CaptureErrorKind) -> Self {
        match (kind, failure) {
            (_, CaptureErrorKind::PermissionDenied) => Self::PermissionDenied,
            (MediaKind::Video, CaptureErrorKind::NotFound) => Self::CameraNotFound,
            (MediaKind::Audio, CaptureErrorKind::NotFound) => Self::MicrophoneNotFound,
            (MediaKind::Video, CaptureErrorKind::NotReadable) => Self::CameraBusy,
            (MediaKind::Audio, CaptureErrorKind::NotReadable) => Self::MicrophoneBusy,
            (MediaKind::Video, _) => Self::CameraFailed,
            (MediaKind::Audio, _) => Self::MicrophoneFailed,
        }
    }

    /// Stable reason code
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::NoDevices => "no-devices",
            Self::CameraNotFound => "camera-not-found",
            Self::MicrophoneNotFound => "microphone-not-found",
            Self::PermissionDenied => "permission-denied",
            Self::CameraBusy => "camera-busy",
            Self::MicrophoneBusy => "microphone-busy",
            Self::ConstraintsRelaxed => "constraints-relaxed",
            Self::CameraFailed => "camera-failed",
            Self::MicrophoneFailed => "microphone-failed",
        }
    }

    /// Message suitable for a toast
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::NoDevices => {
                "No camera or microphone found. You can still join a limited call."
            }
            Self::CameraNotFound => "No camera found. Continuing with audio only.",
            Self::MicrophoneNotFound => "No microphone found. Others will not hear you.",
            Self::PermissionDenied => {
                "Camera and microphone access was denied. Check your browser permissions."
            }
            Self::CameraBusy => "Your camera is in use by another application.",
            Self::MicrophoneBusy => "Your microphone is in use by another application.",
            Self::ConstraintsRelaxed => "Your device does not support the preferred quality.",
            Self::CameraFailed => "The camera could not be started.",
            Self::MicrophoneFailed => "The microphone could not be started.",
        }
    }
}

impl fmt::Display for AcquisitionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Outcome of [`DeviceAccess::acquire_stream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    /// Local stream, empty for a limited call
    pub stream: MediaStream,
    /// What went wrong on the way, in order
    pub notices: Vec<AcquisitionNotice>,
}

impl Acquisition {
    fn limited(notices: Vec<AcquisitionNotice>) -> Self {
        Self {
            stream: MediaStream::empty(),
            notices,
        }
    }

    /// Whether the peer joins without any local media
    #[must_use]
    pub fn is_limited(&self) -> bool {
        self.stream.is_empty()
    }
}

/// Which kinds a capture request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    /// Camera and microphone together
    AudioVideo,
    /// Camera only
    VideoOnly,
    /// Microphone only
    AudioOnly,
}

impl RequestShape {
    /// Shape for the wanted kinds, `None` if nothing is wanted
    #[must_use]
    pub fn from_wants(video: bool, audio: bool) -> Option<Self> {
        match (video, audio) {
            (true, true) => Some(Self::AudioVideo),
            (true, false) => Some(Self::VideoOnly),
            (false, true) => Some(Self::AudioOnly),
            (false, false) => None,
        }
    }

    /// Requested kinds
    #[must_use]
    pub fn kinds(self) -> &'static [MediaKind] {
        match self {
            Self::AudioVideo => &[MediaKind::Video, MediaKind::Audio],
            Self::VideoOnly => &[MediaKind::Video],
            Self::AudioOnly => &[MediaKind::Audio],
        }
    }
}

/// Recovery step after a failed capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Open camera and microphone separately to find the culprit
    ProbeDevices,
    /// Retry once without quality constraints
    RelaxConstraints,
    /// Drop the camera and retry with the microphone
    AudioOnly,
    /// Give up and join with an empty stream
    GiveUp,
}

/// `(request shape, failure) → fallback`; unlisted pairs give up
pub const FALLBACK_POLICY: &[(RequestShape, CaptureErrorKind, Fallback)] = &[
    (RequestShape::AudioVideo, CaptureErrorKind::NotReadable, Fallback::ProbeDevices),
    (RequestShape::AudioVideo, CaptureErrorKind::NotFound, Fallback::ProbeDevices),
    (RequestShape::AudioVideo, CaptureErrorKind::Overconstrained, Fallback::RelaxConstraints),
    (RequestShape::AudioVideo, CaptureErrorKind::Aborted, Fallback::AudioOnly),
    (RequestShape::AudioVideo, CaptureErrorKind::Unknown, Fallback::AudioOnly),
    (RequestShape::AudioVideo, CaptureErrorKind::PermissionDenied, Fallback::GiveUp),
    (RequestShape::VideoOnly, CaptureErrorKind::Overconstrained, Fallback::RelaxConstraints),
    (RequestShape::AudioOnly, CaptureErrorKind::Overconstrained, Fallback::RelaxConstraints),
];

/// Pick the recovery step for a failed capture
///
/// Constraints are relaxed at most once: a second overconstrained failure
/// drops the camera for a combined request and gives up otherwise.
#[must_use]
pub fn resolve_fallback(shape: RequestShape, failure: CaptureErrorKind, relaxed: bool) -> Fallback {
    let fallback = FALLBACK_POLICY
        .iter()
        .find(|(s, f, _)| *s == shape && *f == failure)
        .map_or(Fallback::GiveUp, |(_, _, fallback)| *fallback);

    match fallback {
        Fallback::RelaxConstraints if relaxed => {
            if shape == RequestShape::AudioVideo {
                Fallback::AudioOnly
            } else {
                Fallback::GiveUp
            }
        }
        other => other,
    }
}

fn push_notice(notices: &mut Vec<AcquisitionNotice>, notice: AcquisitionNotice) {
    if !notices.contains(&notice) {
        notices.push(notice);
    }
}

/// Local capture with graceful degradation
#[derive(Clone)]
pub struct DeviceAccess {
    devices: Arc<dyn MediaDevices>,
    audio: AudioPreferences,
    video: VideoPreferences,
}

impl DeviceAccess {
    /// Wrap a capture primitive with processing preferences
    pub fn new(devices: Arc<dyn MediaDevices>, audio: AudioPreferences, video: VideoPreferences) -> Self {
        Self {
            devices,
            audio,
            video,
        }
    }

    /// Devices of one kind, in platform order
    ///
    /// # Errors
    ///
    /// Returns error if enumeration fails
    pub async fn list_devices(&self, kind: DeviceKind) -> Result<Vec<MediaDeviceInfo>, CaptureError> {
        let devices = self.devices.enumerate_devices().await?;
        Ok(devices.into_iter().filter(|d| d.kind == kind).collect())
    }

    /// Acquire a local stream, degrading instead of failing
    #[tracing::instrument(skip(self))]
    pub async fn acquire_stream(&self, want_video: bool, want_audio: bool) -> Acquisition {
        let mut notices = Vec::new();

        let (has_camera, has_microphone) = match self.devices.enumerate_devices().await {
            Ok(devices) => (
                devices.iter().any(|d| d.kind == DeviceKind::VideoInput),
                devices.iter().any(|d| d.kind == DeviceKind::AudioInput),
            ),
            Err(e) => {
                // Let capture itself report what is missing
                tracing::warn!(error = %e, "Device enumeration failed");
                (true, true)
            }
        };

        if !has_camera && !has_microphone {
            tracing::warn!("No capture devices present, joining limited call");
            return Acquisition::limited(vec![AcquisitionNotice::NoDevices]);
        }
        if want_video && !has_camera {
            notices.push(AcquisitionNotice::CameraNotFound);
        }
        if want_audio && !has_microphone {
            notices.push(AcquisitionNotice::MicrophoneNotFound);
        }

        match RequestShape::from_wants(want_video && has_camera, want_audio && has_microphone) {
            Some(shape) => self.acquire_with_policy(shape, notices).await,
            None => Acquisition::limited(notices),
        }
    }

    async fn acquire_with_policy(
        &self,
        mut shape: RequestShape,
        mut notices: Vec<AcquisitionNotice>,
    ) -> Acquisition {
        let mut relaxed = false;

        loop {
            let request = self.request_for(shape, relaxed);
            let err = match self.devices.get_user_media(&request).await {
                Ok(stream) => {
                    tracing::debug!(?shape, relaxed, tracks = stream.tracks().len(), "Acquired local stream");
                    return Acquisition { stream, notices };
                }
                Err(err) => err,
            };

            let fallback = resolve_fallback(shape, err.kind, relaxed);
            tracing::warn!(?shape, failure = %err.kind, ?fallback, "Capture failed");

            match fallback {
                Fallback::ProbeDevices => {
                    let stream = self.probe_devices(relaxed, &mut notices).await;
                    return Acquisition { stream, notices };
                }
                Fallback::RelaxConstraints => {
                    relaxed = true;
                    push_notice(&mut notices, AcquisitionNotice::ConstraintsRelaxed);
                }
                Fallback::AudioOnly => {
                    push_notice(
                        &mut notices,
                        AcquisitionNotice::for_failure(MediaKind::Video, err.kind),
                    );
                    shape = RequestShape::AudioOnly;
                }
                Fallback::GiveUp => {
                    for kind in shape.kinds() {
                        push_notice(&mut notices, AcquisitionNotice::for_failure(*kind, err.kind));
                    }
                    return Acquisition::limited(notices);
                }
            }
        }
    }

    /// Open each device alone and keep whichever works
    async fn probe_devices(&self, relaxed: bool, notices: &mut Vec<AcquisitionNotice>) -> MediaStream {
        let video = self
            .devices
            .get_user_media(&self.request_for(RequestShape::VideoOnly, relaxed))
            .await;
        let audio = self
            .devices
            .get_user_media(&self.request_for(RequestShape::AudioOnly, relaxed))
            .await;

        match (video, audio) {
            (Ok(video), Ok(audio)) => {
                tracing::warn!("Combined capture failed but each device opens alone");
                video.merged(audio)
            }
            (Err(e), Ok(audio)) => {
                push_notice(notices, AcquisitionNotice::for_failure(MediaKind::Video, e.kind));
                audio
            }
            (Ok(video), Err(e)) => {
                push_notice(notices, AcquisitionNotice::for_failure(MediaKind::Audio, e.kind));
                video
            }
            (Err(video_err), Err(audio_err)) => {
                push_notice(notices, AcquisitionNotice::for_failure(MediaKind::Video, video_err.kind));
                push_notice(notices, AcquisitionNotice::for_failure(MediaKind::Audio, audio_err.kind));
                MediaStream::empty()
            }
        }
    }

    /// Capture exactly `device_id` for one kind; never degrades
    ///
    /// # Errors
    ///
    /// Returns the capture error unchanged
    #[tracing::instrument(skip(self))]
    pub async fn capture_track(&self, kind: MediaKind, device_id: &str) -> Result<MediaTrack, CaptureError> {
        let mut constraints = self.constraints_for(kind, false);
        constraints.device_id = Some(device_id.to_string());

        let request = match kind {
            MediaKind::Audio => CaptureRequest {
                audio: Some(constraints),
                video: None,
            },
            MediaKind::Video => CaptureRequest {
                audio: None,
                video: Some(constraints),
            },
        };

        let stream = self.devices.get_user_media(&request).await?;
        stream.track(kind).cloned().ok_or_else(|| {
            stream.stop_all();
            CaptureError::new(CaptureErrorKind::Unknown, format!("no {} track returned", kind))
        })
    }

    fn request_for(&self, shape: RequestShape, relaxed: bool) -> CaptureRequest {
        let mut request = CaptureRequest::default();
        for kind in shape.kinds() {
            let constraints = Some(self.constraints_for(*kind, relaxed));
            match kind {
                MediaKind::Audio => request.audio = constraints,
                MediaKind::Video => request.video = constraints,
            }
        }
        request
    }

    fn constraints_for(&self, kind: MediaKind, relaxed: bool) -> TrackConstraints {
        if relaxed {
            return TrackConstraints::default();
        }
        match kind {
            MediaKind::Audio => TrackConstraints {
                echo_cancellation: Some(self.audio.echo_cancellation),
                noise_suppression: Some(self.audio.noise_suppression),
                auto_gain_control: Some(self.audio.auto_gain_control),
                sample_rate: self.audio.sample_rate,
                ..TrackConstraints::default()
            },
            MediaKind::Video => TrackConstraints {
                facing_mode: self.video.facing_mode,
                width: Some(self.video.width),
                height: Some(self.video.height),
                ..TrackConstraints::default()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticMediaDevices;
    use pretty_assertions::assert_eq;

    fn access(devices: SyntheticMediaDevices) -> DeviceAccess {
        DeviceAccess::new(
            Arc::new(devices),
            AudioPreferences::default(),
            VideoPreferences::default(),
        )
    }

    #[test]
    fn test_policy_table_lookup() {
        use CaptureErrorKind::*;
        use RequestShape::*;
        assert_eq!(resolve_fallback(AudioVideo, NotReadable, false), Fallback::ProbeDevices);
        assert_eq!(resolve_fallback(AudioVideo, PermissionDenied, false), Fallback::GiveUp);
        assert_eq!(resolve_fallback(AudioVideo, Unknown, false), Fallback::AudioOnly);
        assert_eq!(resolve_fallback(AudioOnly, NotReadable, false), Fallback::GiveUp);
        assert_eq!(resolve_fallback(VideoOnly, Overconstrained, false), Fallback::RelaxConstraints);
    }

    #[test]
    fn test_relax_only_once() {
        use CaptureErrorKind::Overconstrained;
        assert_eq!(
            resolve_fallback(RequestShape::AudioVideo, Overconstrained, true),
            Fallback::AudioOnly
        );
        assert_eq!(
            resolve_fallback(RequestShape::AudioOnly, Overconstrained, true),
            Fallback::GiveUp
        );
    }

    #[test]
    fn test_notice_codes_are_stable() {
        assert_eq!(AcquisitionNotice::CameraBusy.code(), "camera-busy");
        assert_eq!(AcquisitionNotice::NoDevices.code(), "no-devices");
        assert_eq!(
            serde_json::to_string(&AcquisitionNotice::MicrophoneBusy).unwrap(),
            "\"microphone-busy\""
        );
    }

    #[test]
    fn test_track_clones_share_state() {
        let track = MediaTrack::new(MediaKind::Video, "cam-1", "Camera");
        let clone = track.clone();
        clone.set_enabled(false);
        assert!(!track.is_enabled());
        clone.stop();
        assert!(!track.is_live());
    }

    #[test]
    fn test_stream_with_track_replaces_kind() {
        let audio = MediaTrack::new(MediaKind::Audio, "mic-1", "Mic");
        let video = MediaTrack::new(MediaKind::Video, "cam-1", "Cam");
        let stream = MediaStream::new(vec![audio.clone(), video]);

        let other = MediaTrack::new(MediaKind::Video, "cam-2", "Cam 2");
        let swapped = stream.with_track(other.clone());

        assert_eq!(swapped.id(), stream.id());
        assert_eq!(swapped.audio_track(), Some(&audio));
        assert_eq!(swapped.video_track(), Some(&other));
        assert_eq!(swapped.tracks().len(), 2);
    }

    #[tokio::test]
    async fn test_acquire_full_stream() {
        let access = access(SyntheticMediaDevices::with_default_devices());
        let acquisition = access.acquire_stream(true, true).await;
        assert!(acquisition.notices.is_empty());
        assert!(acquisition.stream.has_live_video());
        assert!(acquisition.stream.audio_track().is_some());
    }

    #[tokio::test]
    async fn test_no_devices_gives_limited_call() {
        let access = access(SyntheticMediaDevices::new());
        let acquisition = access.acquire_stream(true, true).await;
        assert!(acquisition.is_limited());
        assert_eq!(acquisition.notices, vec![AcquisitionNotice::NoDevices]);
    }

    #[tokio::test]
    async fn test_missing_camera_goes_audio_only() {
        let access = access(SyntheticMediaDevices::new().with_microphone("mic-1", "Mic"));
        let acquisition = access.acquire_stream(true, true).await;
        assert_eq!(acquisition.notices, vec![AcquisitionNotice::CameraNotFound]);
        assert!(!acquisition.stream.has_live_video());
        assert!(acquisition.stream.audio_track().is_some());
    }

    #[tokio::test]
    async fn test_busy_microphone_is_attributed() {
        let devices = SyntheticMediaDevices::with_default_devices()
            .with_fault("mic-1", CaptureErrorKind::NotReadable);
        let acquisition = access(devices).acquire_stream(true, true).await;
        assert_eq!(acquisition.notices, vec![AcquisitionNotice::MicrophoneBusy]);
        assert!(acquisition.stream.has_live_video());
        assert!(acquisition.stream.audio_track().is_none());
    }

    #[tokio::test]
    async fn test_permission_denied_reported_distinctly() {
        let devices = SyntheticMediaDevices::with_default_devices().with_permission_denied();
        let acquisition = access(devices).acquire_stream(true, true).await;
        assert!(acquisition.is_limited());
        assert_eq!(acquisition.notices, vec![AcquisitionNotice::PermissionDenied]);
    }

    #[tokio::test]
    async fn test_audio_only_failure_gives_empty_stream() {
        let devices = SyntheticMediaDevices::new()
            .with_microphone("mic-1", "Mic")
            .with_fault("mic-1", CaptureErrorKind::NotReadable);
        let acquisition = access(devices).acquire_stream(false, true).await;
        assert!(acquisition.is_limited());
        assert_eq!(acquisition.notices, vec![AcquisitionNotice::MicrophoneBusy]);
    }

    #[tokio::test]
    async fn test_capture_track_exact_device() {
        let devices = SyntheticMediaDevices::with_default_devices().with_camera("cam-2", "Rear");
        let access = access(devices);

        let track = access.capture_track(MediaKind::Video, "cam-2").await.unwrap();
        assert_eq!(track.device_id(), "cam-2");

        let err = access
            .capture_track(MediaKind::Video, "missing")
            .await
            .unwrap_err();
        assert_eq!(err.kind, CaptureErrorKind::Overconstrained);
    }

    #[tokio::test]
    async fn test_list_devices_filters_kind() {
        let access = access(SyntheticMediaDevices::with_default_devices().with_camera("cam-2", "Rear"));
        let cams = access.list_devices(DeviceKind::VideoInput).await.unwrap();
        let ids: Vec<_> = cams.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["cam-1", "cam-2"]);
    }
}
