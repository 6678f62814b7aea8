//! Two-party harness shared by the integration tests

#![allow(dead_code)]

use classcall_core::{
    CallConfig, CallService, CallState, LoopbackNetwork, MemoryHub, ParticipantId, Ringer,
    SignalMessage, SyntheticMediaDevices,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// Ringer that counts start/stop calls
#[derive(Debug, Default)]
pub struct CountingRinger {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl CountingRinger {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Ringer for CountingRinger {
    fn start_ringing(&self, _caller: &ParticipantId) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_ringing(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// One started participant
pub struct Party {
    pub id: ParticipantId,
    pub service: CallService,
    pub devices: Arc<SyntheticMediaDevices>,
    pub ringer: Arc<CountingRinger>,
}

impl Party {
    pub fn state(&self) -> CallState {
        self.service.state()
    }

    pub async fn wait_for_state(&self, wanted: CallState) {
        let mut rx = self.service.store().watch_state();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == wanted))
            .await
            .unwrap_or_else(|_| panic!("{} never reached {:?}, stuck in {:?}", self.id, wanted, self.state()))
            .unwrap();
    }

    pub async fn wait_for_pending(&self) {
        let mut rx = self.service.store().watch_pending();
        tokio::time::timeout(WAIT, rx.wait_for(Option::is_some))
            .await
            .unwrap_or_else(|_| panic!("{} never saw an offer", self.id))
            .unwrap();
    }
}

/// Hub plus loopback network shared by every party
pub struct Harness {
    pub hub: MemoryHub,
    pub network: LoopbackNetwork,
    pub config: CallConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_network(LoopbackNetwork::new())
    }

    pub fn with_network(network: LoopbackNetwork) -> Self {
        Self {
            hub: MemoryHub::new(),
            network,
            config: CallConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn party(&self, name: &str, devices: SyntheticMediaDevices) -> Party {
        let id = ParticipantId::new(name).unwrap();
        let devices = Arc::new(devices);
        let ringer = Arc::new(CountingRinger::default());
        let service = CallService::builder(id.clone(), Arc::new(self.hub.client()))
            .with_config(self.config.clone())
            .with_media_devices(devices.clone())
            .with_peer_factory(Arc::new(self.network.factory(name)))
            .with_ringer(ringer.clone())
            .build()
            .unwrap();
        service.start().await.unwrap();
        Party {
            id,
            service,
            devices,
            ringer,
        }
    }

    /// Publish a raw message on the shared topic
    pub async fn inject(&self, message: &SignalMessage) {
        use classcall_core::SignalingTransport;
        self.hub
            .client()
            .publish(&self.config.signaling.topic, message.encode().unwrap())
            .await
            .unwrap();
    }
}

/// Poll until `check` holds
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn camera_and_mic() -> SyntheticMediaDevices {
    SyntheticMediaDevices::with_default_devices()
}

pub fn mic_only() -> SyntheticMediaDevices {
    SyntheticMediaDevices::new()
        .with_microphone("mic-1", "Built-in Microphone")
        .with_speaker("spk-1", "Built-in Speakers")
}

/// Caller dials callee and the callee answers; both end up connected
pub async fn connect(caller: &Party, callee: &Party) {
    caller.service.call(callee.id.clone()).await.unwrap();
    callee.wait_for_pending().await;
    callee.service.notifier().accept().await.unwrap();
    caller.wait_for_state(CallState::Connected).await;
    callee.wait_for_state(CallState::Connected).await;
}
