//! Device switching during a call
//!
//! Inputs are swapped with `replace_track` on the live peer session, so no
//! renegotiation happens. A failed switch never takes the current device
//! away: the new track is released and the old one keeps flowing.

use crate::call::{CallError, CallManager};
use crate::media::MediaStream;
use crate::session::CallSession;
use crate::types::{CallEvent, MediaKind};

impl CallManager {
    /// Use another microphone for the rest of the call
    ///
    /// # Errors
    ///
    /// Returns error if no call is active or the device cannot be captured
    /// or attached; the previous microphone stays in use
    pub async fn switch_audio_input(&self, device_id: &str) -> Result<(), CallError> {
        self.switch_input(MediaKind::Audio, device_id).await
    }

    /// Use another camera for the rest of the call
    ///
    /// # Errors
    ///
    /// Returns error if no call is active or the device cannot be captured
    /// or attached; the previous camera stays in use
    pub async fn switch_video_input(&self, device_id: &str) -> Result<(), CallError> {
        self.switch_input(MediaKind::Video, device_id).await
    }

    #[tracing::instrument(skip(self), fields(local = %self.local_id))]
    async fn switch_input(&self, kind: MediaKind, device_id: &str) -> Result<(), CallError> {
        let core = self.core.lock().await;
        let call_id = core.call_id.ok_or(CallError::NoActiveCall)?;
        let peer = core.peer.clone().ok_or(CallError::NoActiveCall)?;
        let session = self.store.session().ok_or(CallError::NoActiveCall)?;
        let local = session.local_stream.clone().unwrap_or_else(MediaStream::empty);
        let previous = local.track(kind).cloned();

        let track = match self.devices.capture_track(kind, device_id).await {
            Ok(track) => track,
            Err(e) => {
                tracing::warn!(error = %e, "Device switch failed, keeping current device");
                return Err(e.into());
            }
        };
        if let Some(previous) = &previous {
            track.set_enabled(previous.is_enabled());
        }

        if let Err(e) = peer.replace_track(kind, &track).await {
            tracing::warn!(error = %e, "Could not attach new device, keeping current device");
            track.stop();
            return Err(e.into());
        }
        if let Some(previous) = previous {
            previous.stop();
        }

        let mut updated = CallSession {
            local_stream: Some(local.with_track(track)),
            ..session
        };
        match kind {
            MediaKind::Audio => updated.current_audio_device_id = Some(device_id.to_string()),
            MediaKind::Video => updated.current_video_device_id = Some(device_id.to_string()),
        }
        self.store.set_session(Some(updated));
        drop(core);

        self.emit(CallEvent::DeviceSwitched {
            call_id,
            kind: Some(kind),
            device_id: device_id.to_string(),
        });
        tracing::info!(call_id = %call_id, "Switched {} input", kind);
        Ok(())
    }

    /// Route remote audio to another speaker
    ///
    /// # Errors
    ///
    /// Returns [`CallError::OutputSelectionUnsupported`] when the playback
    /// element cannot choose a device, or an error if no call is active or
    /// routing fails
    #[tracing::instrument(skip(self), fields(local = %self.local_id))]
    pub async fn switch_audio_output(&self, device_id: &str) -> Result<(), CallError> {
        let output = self
            .audio_output
            .clone()
            .filter(|o| o.supports_output_selection())
            .ok_or(CallError::OutputSelectionUnsupported)?;

        let core = self.core.lock().await;
        let call_id = core.call_id.ok_or(CallError::NoActiveCall)?;
        let session = self.store.session().ok_or(CallError::NoActiveCall)?;

        output.set_output_device(device_id).await?;
        self.store.set_session(Some(CallSession {
            current_audio_output_id: Some(device_id.to_string()),
            ..session
        }));
        drop(core);

        self.emit(CallEvent::DeviceSwitched {
            call_id,
            kind: None,
            device_id: device_id.to_string(),
        });
        tracing::info!(call_id = %call_id, "Switched audio output");
        Ok(())
    }

    /// Mute or unmute the microphone
    ///
    /// # Errors
    ///
    /// Returns error if no call is active or there is no microphone track
    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.set_track_enabled(MediaKind::Audio, enabled).await
    }

    /// Turn the camera picture on or off
    ///
    /// # Errors
    ///
    /// Returns error if no call is active or there is no camera track
    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.set_track_enabled(MediaKind::Video, enabled).await
    }

    async fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<(), CallError> {
        let _core = self.core.lock().await;
        let session = self.store.session().ok_or(CallError::NoActiveCall)?;
        let track = session
            .local_stream
            .as_ref()
            .and_then(|s| s.track(kind))
            .ok_or(CallError::NoLocalTrack(kind))?;

        track.set_enabled(enabled);
        tracing::debug!(call_id = %session.id, kind = %kind, enabled, "Local track toggled");
        // Republish so observers re-render
        self.store.set_session(Some(session.clone()));
        Ok(())
    }
}
