//! Call service orchestration
//!
//! [`CallService`] wires one participant together: signaling channel, device
//! access, peer backend, call manager and observable store. Several services
//! can share a process, each with its own store.

use crate::call::{CallError, CallManager, CallManagerDeps};
use crate::config::{CallConfig, ConfigError};
use crate::identity::ParticipantId;
use crate::incoming::{IncomingCallNotifier, Ringer, TracingRinger};
use crate::media::{AudioOutput, CaptureError, DeviceAccess, DeviceKind, MediaDeviceInfo, MediaDevices};
use crate::peer::PeerSessionFactory;
use crate::session::CallStore;
use crate::signaling::{SignalMessage, SignalingChannel, SignalingError, SignalingTransport};
use crate::types::{CallEvent, CallId, CallState};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Initialization error
    #[error("Initialization error: {0}")]
    InitError(String),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Signaling could not be brought up
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// Call error
    #[error(transparent)]
    Call(#[from] CallError),
}

/// One participant's call stack
pub struct CallService {
    manager: Arc<CallManager>,
    signaling: Arc<SignalingChannel>,
    devices: DeviceAccess,
    run_task: Mutex<Option<JoinHandle<mpsc::UnboundedReceiver<SignalMessage>>>>,
}

impl CallService {
    /// Create a builder
    #[must_use]
    pub fn builder(local_id: ParticipantId, transport: Arc<dyn SignalingTransport>) -> CallServiceBuilder {
        CallServiceBuilder::new(local_id, transport)
    }

    /// Start the service
    ///
    /// Connects signaling and spawns the call manager's run loop. Calling it
    /// again while running does nothing; after [`Self::stop`] it starts again.
    ///
    /// # Errors
    ///
    /// Returns error if the first subscription fails
    #[tracing::instrument(skip(self), fields(local = %self.manager.local_id()))]
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut run_task = self.run_task.lock().await;
        if run_task.is_some() {
            return Ok(());
        }
        tracing::info!("Starting call service");

        self.signaling.connect().await?;
        let signals = self
            .signaling
            .take_receiver()
            .ok_or_else(|| ServiceError::InitError("Signaling receiver already taken".to_string()))?;
        *run_task = Some(tokio::spawn(Arc::clone(&self.manager).run(signals)));

        tracing::info!(topic = %self.signaling.topic(), "Call service started");
        Ok(())
    }

    /// Stop the service
    ///
    /// Hangs up any call, shuts the signaling pump down and halts the run loop.
    #[tracing::instrument(skip(self), fields(local = %self.manager.local_id()))]
    pub async fn stop(&self) {
        self.manager.end_call().await;
        self.signaling.shutdown().await;
        if let Some(task) = self.run_task.lock().await.take() {
            self.manager.halt();
            match task.await {
                Ok(signals) => self.signaling.restore_receiver(signals),
                Err(e) => tracing::warn!(error = %e, "Call manager task ended abnormally"),
            }
        }
        tracing::info!("Call service stopped");
    }

    /// Call `remote`
    ///
    /// # Errors
    ///
    /// Returns error if the call cannot be initiated
    pub async fn call(&self, remote: ParticipantId) -> Result<CallId, ServiceError> {
        Ok(self.manager.initiate_call(remote).await?)
    }

    /// Hang up the current call
    pub async fn hang_up(&self) {
        self.manager.end_call().await;
    }

    /// The call manager
    #[must_use]
    pub fn manager(&self) -> &Arc<CallManager> {
        &self.manager
    }

    /// Accept/decline view over the pending offer
    #[must_use]
    pub fn notifier(&self) -> IncomingCallNotifier {
        IncomingCallNotifier::new(Arc::clone(&self.manager))
    }

    /// Observable state
    #[must_use]
    pub fn store(&self) -> &CallStore {
        self.manager.store()
    }

    /// Current negotiation state
    #[must_use]
    pub fn state(&self) -> CallState {
        self.manager.state()
    }

    /// Subscribe to call events
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.manager.subscribe_events()
    }

    /// Whether the signaling subscription is up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.signaling.is_connected()
    }

    /// Devices of one kind
    ///
    /// # Errors
    ///
    /// Returns error if enumeration fails
    pub async fn list_devices(&self, kind: DeviceKind) -> Result<Vec<MediaDeviceInfo>, CaptureError> {
        self.devices.list_devices(kind).await
    }
}

/// Call service builder
pub struct CallServiceBuilder {
    local_id: ParticipantId,
    transport: Arc<dyn SignalingTransport>,
    config: CallConfig,
    media_devices: Option<Arc<dyn MediaDevices>>,
    peer_factory: Option<Arc<dyn PeerSessionFactory>>,
    ringer: Arc<dyn Ringer>,
    audio_output: Option<Arc<dyn AudioOutput>>,
    store: CallStore,
}

impl CallServiceBuilder {
    /// Create new builder
    #[must_use]
    pub fn new(local_id: ParticipantId, transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            local_id,
            transport,
            config: CallConfig::default(),
            media_devices: None,
            peer_factory: None,
            ringer: Arc::new(TracingRinger),
            audio_output: None,
            store: CallStore::new(),
        }
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the capture backend (required)
    #[must_use]
    pub fn with_media_devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.media_devices = Some(devices);
        self
    }

    /// Set the peer backend
    #[must_use]
    pub fn with_peer_factory(mut self, factory: Arc<dyn PeerSessionFactory>) -> Self {
        self.peer_factory = Some(factory);
        self
    }

    /// Set the ringing indication
    #[must_use]
    pub fn with_ringer(mut self, ringer: Arc<dyn Ringer>) -> Self {
        self.ringer = ringer;
        self
    }

    /// Set the playback element
    #[must_use]
    pub fn with_audio_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.audio_output = Some(output);
        self
    }

    /// Use an existing store instead of a fresh one
    #[must_use]
    pub fn with_store(mut self, store: CallStore) -> Self {
        self.store = store;
        self
    }

    /// Build the service
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, no capture backend was
    /// given, or no peer backend is available
    pub fn build(self) -> Result<CallService, ServiceError> {
        self.config.validate()?;

        let media_devices = self
            .media_devices
            .ok_or_else(|| ServiceError::InitError("No media devices configured".to_string()))?;
        let peers = match self.peer_factory {
            Some(factory) => factory,
            None => default_peer_factory()?,
        };

        let signaling = Arc::new(SignalingChannel::new(
            self.transport,
            self.config.signaling.clone(),
        ));
        let devices = DeviceAccess::new(
            media_devices,
            self.config.audio.clone(),
            self.config.video.clone(),
        );

        let manager = Arc::new(CallManager::new(CallManagerDeps {
            local_id: self.local_id,
            config: self.config,
            signaling: Arc::clone(&signaling),
            devices: devices.clone(),
            peers,
            store: self.store,
            ringer: self.ringer,
            audio_output: self.audio_output,
        }));

        Ok(CallService {
            manager,
            signaling,
            devices,
            run_task: Mutex::new(None),
        })
    }
}

#[cfg(feature = "webrtc-backend")]
fn default_peer_factory() -> Result<Arc<dyn PeerSessionFactory>, ServiceError> {
    Ok(Arc::new(crate::webrtc_peer::WebRtcPeerFactory::new()))
}

#[cfg(not(feature = "webrtc-backend"))]
fn default_peer_factory() -> Result<Arc<dyn PeerSessionFactory>, ServiceError> {
    Err(ServiceError::InitError(
        "No peer backend configured and webrtc-backend is disabled".to_string(),
    ))
}
