//! Device acquisition fallback tests

use classcall_core::config::{AudioPreferences, VideoPreferences};
use classcall_core::{
    AcquisitionNotice, CaptureErrorKind, DeviceAccess, DeviceKind, MediaKind,
    SyntheticMediaDevices,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

fn access(devices: SyntheticMediaDevices) -> DeviceAccess {
    DeviceAccess::new(
        Arc::new(devices),
        AudioPreferences::default(),
        VideoPreferences::default(),
    )
}

fn fault_strategy() -> impl Strategy<Value = Option<CaptureErrorKind>> {
    prop_oneof![
        Just(None),
        Just(Some(CaptureErrorKind::NotReadable)),
        Just(Some(CaptureErrorKind::Overconstrained)),
        Just(Some(CaptureErrorKind::Aborted)),
        Just(Some(CaptureErrorKind::Unknown)),
    ]
}

#[derive(Debug, Clone)]
struct Setup {
    camera: bool,
    microphone: bool,
    camera_fault: Option<CaptureErrorKind>,
    microphone_fault: Option<CaptureErrorKind>,
    permission_denied: bool,
}

impl Setup {
    fn devices(&self) -> SyntheticMediaDevices {
        let mut devices = SyntheticMediaDevices::new();
        if self.camera {
            devices = devices.with_camera("cam-1", "Integrated Camera");
        }
        if self.microphone {
            devices = devices.with_microphone("mic-1", "Built-in Microphone");
        }
        if let Some(kind) = self.camera_fault {
            devices = devices.with_fault("cam-1", kind);
        }
        if let Some(kind) = self.microphone_fault {
            devices = devices.with_fault("mic-1", kind);
        }
        if self.permission_denied {
            devices = devices.with_permission_denied();
        }
        devices
    }

    fn healthy(&self, kind: MediaKind) -> bool {
        !self.permission_denied
            && match kind {
                MediaKind::Video => self.camera && self.camera_fault.is_none(),
                MediaKind::Audio => self.microphone && self.microphone_fault.is_none(),
            }
    }
}

fn setup_strategy() -> impl Strategy<Value = Setup> {
    (
        any::<bool>(),
        any::<bool>(),
        fault_strategy(),
        fault_strategy(),
        any::<bool>(),
    )
        .prop_map(
            |(camera, microphone, camera_fault, microphone_fault, permission_denied)| Setup {
                camera,
                microphone,
                camera_fault,
                microphone_fault,
                permission_denied,
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn acquisition_always_returns_a_stream(setup in setup_strategy()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let acquisition = access(setup.devices()).acquire_stream(true, true).await;

            for track in acquisition.stream.tracks() {
                prop_assert!(track.is_live());
                prop_assert!(setup.healthy(track.kind()), "unhealthy {} device in stream", track.kind());
            }
            if acquisition.is_limited() {
                prop_assert!(!acquisition.notices.is_empty());
            }
            if !setup.camera && !setup.microphone {
                prop_assert_eq!(acquisition.notices.clone(), vec![AcquisitionNotice::NoDevices]);
            }
            if setup.permission_denied && (setup.camera || setup.microphone) {
                prop_assert!(acquisition.is_limited());
                prop_assert!(acquisition.notices.contains(&AcquisitionNotice::PermissionDenied));
            }
            if setup.camera_fault.is_none() && setup.microphone_fault.is_none() && !setup.permission_denied {
                prop_assert_eq!(acquisition.stream.video_track().is_some(), setup.camera);
                prop_assert_eq!(acquisition.stream.audio_track().is_some(), setup.microphone);
            }
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn busy_camera_is_attributed_to_the_camera() {
    let devices = SyntheticMediaDevices::with_default_devices()
        .with_fault("cam-1", CaptureErrorKind::NotReadable);

    let acquisition = access(devices).acquire_stream(true, true).await;

    assert_eq!(acquisition.notices, vec![AcquisitionNotice::CameraBusy]);
    assert!(acquisition.stream.video_track().is_none());
    assert_eq!(acquisition.stream.audio_track().unwrap().device_id(), "mic-1");
}

#[tokio::test]
async fn busy_microphone_keeps_video() {
    let devices = SyntheticMediaDevices::with_default_devices()
        .with_fault("mic-1", CaptureErrorKind::NotReadable);

    let acquisition = access(devices).acquire_stream(true, true).await;

    assert_eq!(acquisition.notices, vec![AcquisitionNotice::MicrophoneBusy]);
    assert!(acquisition.stream.audio_track().is_none());
    assert!(acquisition.stream.has_live_video());
}

#[tokio::test]
async fn missing_camera_goes_straight_to_audio() {
    let devices = SyntheticMediaDevices::new().with_microphone("mic-1", "Built-in Microphone");
    let synthetic = Arc::new(devices);
    let access = DeviceAccess::new(
        synthetic.clone(),
        AudioPreferences::default(),
        VideoPreferences::default(),
    );

    let acquisition = access.acquire_stream(true, true).await;

    assert_eq!(acquisition.notices, vec![AcquisitionNotice::CameraNotFound]);
    assert!(acquisition.stream.audio_track().is_some());
    assert_eq!(synthetic.capture_count(), 1);
}

#[tokio::test]
async fn overconstrained_camera_relaxes_then_drops_video() {
    let devices = SyntheticMediaDevices::with_default_devices()
        .with_fault("cam-1", CaptureErrorKind::Overconstrained);

    let acquisition = access(devices).acquire_stream(true, true).await;

    assert_eq!(
        acquisition.notices,
        vec![AcquisitionNotice::ConstraintsRelaxed, AcquisitionNotice::CameraFailed]
    );
    assert!(acquisition.stream.audio_track().is_some());
    assert!(acquisition.stream.video_track().is_none());
}

#[tokio::test]
async fn labels_appear_after_first_capture() {
    let synthetic = Arc::new(SyntheticMediaDevices::with_default_devices());
    let access = DeviceAccess::new(
        synthetic.clone(),
        AudioPreferences::default(),
        VideoPreferences::default(),
    );

    let before = access.list_devices(DeviceKind::VideoInput).await.unwrap();
    assert!(before[0].label.is_empty());

    access.acquire_stream(true, true).await.stream.stop_all();

    let after = access.list_devices(DeviceKind::VideoInput).await.unwrap();
    assert_eq!(after[0].label, "Integrated Camera");
}

#[tokio::test]
async fn exact_capture_never_degrades() {
    let access = access(SyntheticMediaDevices::with_default_devices());

    let err = access.capture_track(MediaKind::Video, "cam-9").await.unwrap_err();
    assert_eq!(err.kind, CaptureErrorKind::Overconstrained);

    let track = access.capture_track(MediaKind::Audio, "mic-1").await.unwrap();
    assert_eq!(track.kind(), MediaKind::Audio);
    assert_eq!(track.device_id(), "mic-1");
}

#[tokio::test]
async fn busy_camera_without_microphone_joins_limited() {
    let synthetic = Arc::new(
        SyntheticMediaDevices::new()
            .with_camera("cam-1", "Integrated Camera")
            .with_fault("cam-1", CaptureErrorKind::NotReadable),
    );
    let access = DeviceAccess::new(
        synthetic.clone(),
        AudioPreferences::default(),
        VideoPreferences::default(),
    );

    let acquisition = access.acquire_stream(true, true).await;

    assert!(acquisition.is_limited());
    assert_eq!(
        acquisition.notices,
        vec![AcquisitionNotice::MicrophoneNotFound, AcquisitionNotice::CameraBusy]
    );
    assert_eq!(synthetic.capture_count(), 0);
}

#[tokio::test]
async fn video_only_request_never_opens_the_microphone() {
    let synthetic = Arc::new(
        SyntheticMediaDevices::with_default_devices().with_fault("cam-1", CaptureErrorKind::NotReadable),
    );
    let access = DeviceAccess::new(
        synthetic.clone(),
        AudioPreferences::default(),
        VideoPreferences::default(),
    );

    let acquisition = access.acquire_stream(true, false).await;

    assert!(acquisition.is_limited());
    assert_eq!(acquisition.notices, vec![AcquisitionNotice::CameraBusy]);
    assert_eq!(synthetic.capture_count(), 0);
}
