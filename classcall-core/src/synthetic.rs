//! In-process capture devices
//!
//! Behaves like a browser's capture primitive closely enough to drive the
//! degradation paths: labels stay hidden until the first successful capture,
//! an exact device id that does not exist is overconstrained, and faults can
//! be injected per device or globally.

use crate::media::{
    CaptureError, CaptureErrorKind, CaptureRequest, DeviceKind, MediaDeviceInfo, MediaDevices,
    MediaStream, MediaTrack,
};
use crate::types::MediaKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct DeviceState {
    devices: Vec<MediaDeviceInfo>,
    faults: HashMap<String, CaptureErrorKind>,
    permission_denied: bool,
    permission_granted: bool,
    captures: usize,
}

/// Configurable device set for tests and the demo
#[derive(Debug, Default)]
pub struct SyntheticMediaDevices {
    state: Mutex<DeviceState>,
}

impl SyntheticMediaDevices {
    /// No devices at all
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One camera (`cam-1`), one microphone (`mic-1`) and one speaker (`spk-1`)
    #[must_use]
    pub fn with_default_devices() -> Self {
        Self::new()
            .with_camera("cam-1", "Integrated Camera")
            .with_microphone("mic-1", "Built-in Microphone")
            .with_speaker("spk-1", "Built-in Speakers")
    }

    fn with_device(mut self, kind: DeviceKind, device_id: &str, label: &str) -> Self {
        self.state.get_mut().devices.push(MediaDeviceInfo {
            device_id: device_id.to_string(),
            label: label.to_string(),
            kind,
        });
        self
    }

    /// Add a camera
    #[must_use]
    pub fn with_camera(self, device_id: &str, label: &str) -> Self {
        self.with_device(DeviceKind::VideoInput, device_id, label)
    }

    /// Add a microphone
    #[must_use]
    pub fn with_microphone(self, device_id: &str, label: &str) -> Self {
        self.with_device(DeviceKind::AudioInput, device_id, label)
    }

    /// Add a speaker
    #[must_use]
    pub fn with_speaker(self, device_id: &str, label: &str) -> Self {
        self.with_device(DeviceKind::AudioOutput, device_id, label)
    }

    /// Make every capture of `device_id` fail with `kind`
    #[must_use]
    pub fn with_fault(mut self, device_id: &str, kind: CaptureErrorKind) -> Self {
        self.state.get_mut().faults.insert(device_id.to_string(), kind);
        self
    }

    /// Refuse every capture
    #[must_use]
    pub fn with_permission_denied(mut self) -> Self {
        self.state.get_mut().permission_denied = true;
        self
    }

    /// Set or clear a device fault at runtime
    pub fn set_fault(&self, device_id: &str, kind: Option<CaptureErrorKind>) {
        let mut state = self.state.lock();
        match kind {
            Some(kind) => state.faults.insert(device_id.to_string(), kind),
            None => state.faults.remove(device_id),
        };
    }

    /// Toggle global permission denial at runtime
    pub fn set_permission_denied(&self, denied: bool) {
        self.state.lock().permission_denied = denied;
    }

    /// Unplug a device
    pub fn remove_device(&self, device_id: &str) {
        self.state.lock().devices.retain(|d| d.device_id != device_id);
    }

    /// Number of successful captures so far
    #[must_use]
    pub fn capture_count(&self) -> usize {
        self.state.lock().captures
    }

    fn select(state: &DeviceState, kind: MediaKind, request: &CaptureRequest) -> Result<MediaDeviceInfo, CaptureError> {
        let device_kind = DeviceKind::from(kind);
        let exact = request.constraints(kind).and_then(|c| c.device_id.as_deref());

        let device = match exact {
            Some(id) => state
                .devices
                .iter()
                .find(|d| d.kind == device_kind && d.device_id == id)
                .ok_or_else(|| {
                    CaptureError::new(CaptureErrorKind::Overconstrained, format!("no {} device {}", kind, id))
                })?,
            None => state
                .devices
                .iter()
                .find(|d| d.kind == device_kind)
                .ok_or_else(|| CaptureError::new(CaptureErrorKind::NotFound, format!("no {} device", kind)))?,
        };

        if let Some(fault) = state.faults.get(&device.device_id) {
            return Err(CaptureError::new(
                *fault,
                format!("{} could not be started", device.label),
            ));
        }
        Ok(device.clone())
    }
}

#[async_trait]
impl MediaDevices for SyntheticMediaDevices {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, CaptureError> {
        let state = self.state.lock();
        let devices = state
            .devices
            .iter()
            .map(|d| MediaDeviceInfo {
                label: if state.permission_granted {
                    d.label.clone()
                } else {
                    String::new()
                },
                ..d.clone()
            })
            .collect();
        Ok(devices)
    }

    async fn get_user_media(&self, request: &CaptureRequest) -> Result<MediaStream, CaptureError> {
        let mut state = self.state.lock();
        if state.permission_denied {
            return Err(CaptureError::new(
                CaptureErrorKind::PermissionDenied,
                "permission denied by user",
            ));
        }

        let mut selected = Vec::new();
        for kind in [MediaKind::Video, MediaKind::Audio] {
            if request.constraints(kind).is_some() {
                selected.push((kind, Self::select(&state, kind, request)?));
            }
        }
        if selected.is_empty() {
            return Err(CaptureError::new(CaptureErrorKind::Unknown, "empty capture request"));
        }

        state.permission_granted = true;
        state.captures += 1;
        let tracks = selected
            .into_iter()
            .map(|(kind, device)| MediaTrack::new(kind, device.device_id, device.label))
            .collect();
        Ok(MediaStream::new(tracks))
    }
}
