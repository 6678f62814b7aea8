//! In-process two-party demo call
//!
//! Runs a caller and a callee in one process over the in-memory hub and the
//! loopback peer backend, printing each side's events as they happen.

use anyhow::{bail, Context, Result};
use classcall_core::prelude::*;
use classcall_core::{
    AcquisitionNotice, CaptureErrorKind, LoopbackNetwork, MemoryHub, SyntheticMediaDevices,
    TracingRinger,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Upper bound for each step of the demo
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// What the demo should simulate
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Caller id
    pub caller: String,
    /// Callee id
    pub callee: String,
    /// Caller has a camera
    pub caller_video: bool,
    /// Callee has a camera
    pub callee_video: bool,
    /// Caller's camera is held by another application
    pub camera_busy: bool,
    /// Callee declines instead of answering
    pub decline: bool,
    /// How long to stay connected before hanging up
    pub hold: Duration,
}

/// How the demo went
#[derive(Debug, Clone, Default)]
pub struct DemoOutcome {
    /// Both sides reached `Connected`
    pub connected: bool,
    /// Caller's view while connected
    pub caller_audio_only: bool,
    /// Callee's view while connected
    pub callee_audio_only: bool,
    /// Notices raised on the caller side
    pub caller_notices: Vec<AcquisitionNotice>,
    /// Final caller state
    pub caller_state: Option<CallState>,
    /// Final callee state
    pub callee_state: Option<CallState>,
}

/// Simulated devices for one side
pub fn devices_for(video: bool, camera_busy: bool) -> SyntheticMediaDevices {
    let devices = SyntheticMediaDevices::new()
        .with_microphone("mic-1", "Built-in Microphone")
        .with_speaker("spk-1", "Built-in Speakers");
    if !video {
        return devices;
    }
    let devices = devices.with_camera("cam-1", "Integrated Camera");
    if camera_busy {
        devices.with_fault("cam-1", CaptureErrorKind::NotReadable)
    } else {
        devices
    }
}

/// One-line rendering of an event
pub fn describe(event: &CallEvent) -> String {
    match event {
        CallEvent::IncomingCall { caller, .. } => format!("📞 Incoming call from {caller}"),
        CallEvent::MissedCall { caller, .. } => format!("📵 Missed call from {caller}"),
        CallEvent::CallInitiated { callee, .. } => format!("📞 Calling {callee}..."),
        CallEvent::CallAccepted { .. } => "✅ Call accepted".to_string(),
        CallEvent::CallDeclined { .. } => "❌ Call declined".to_string(),
        CallEvent::StateChanged { state, .. } => format!("   State: {state:?}"),
        CallEvent::ConnectionEstablished { .. } => "🔗 Connected".to_string(),
        CallEvent::RemoteTrackAdded { kind, .. } => format!("   Remote {kind} track"),
        CallEvent::MediaNotice { notice, .. } => format!("⚠️  {}", notice.message()),
        CallEvent::DeviceSwitched { device_id, .. } => format!("   Switched to {device_id}"),
        CallEvent::CallEnded { reason, .. } => format!("📞 Call ended ({reason})"),
    }
}

fn spawn_printer(label: &'static str, mut events: broadcast::Receiver<CallEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("[{label}] {}", describe(&event)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "Event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn wait_for_state(
    mut rx: watch::Receiver<CallState>,
    wanted: CallState,
    who: &str,
) -> Result<()> {
    tokio::time::timeout(STEP_TIMEOUT, rx.wait_for(|s| *s == wanted))
        .await
        .with_context(|| format!("{who} did not reach {wanted:?}"))?
        .map(|_| ())
        .with_context(|| format!("{who} stopped publishing state"))
}

fn build_service(
    hub: &MemoryHub,
    network: &LoopbackNetwork,
    config: &CallConfig,
    id: &str,
    devices: SyntheticMediaDevices,
) -> Result<CallService> {
    let service = CallService::builder(ParticipantId::new(id)?, Arc::new(hub.client()))
        .with_config(config.clone())
        .with_media_devices(Arc::new(devices))
        .with_peer_factory(Arc::new(network.factory(id)))
        .with_ringer(Arc::new(TracingRinger))
        .build()?;
    Ok(service)
}

/// Run the demo call end to end
pub async fn run_demo(config: &CallConfig, options: &DemoOptions) -> Result<DemoOutcome> {
    if options.caller == options.callee {
        bail!("Caller and callee must differ");
    }

    let hub = MemoryHub::new();
    let network = LoopbackNetwork::new();
    let caller = build_service(
        &hub,
        &network,
        config,
        &options.caller,
        devices_for(options.caller_video, options.camera_busy),
    )?;
    let callee = build_service(
        &hub,
        &network,
        config,
        &options.callee,
        devices_for(options.callee_video, false),
    )?;

    caller.start().await?;
    callee.start().await?;
    let printers = [
        spawn_printer("caller", caller.subscribe_events()),
        spawn_printer("callee", callee.subscribe_events()),
    ];
    let mut caller_events = caller.subscribe_events();

    let result = drive(&caller, &callee, options).await;

    let mut outcome = result?;
    while let Ok(event) = caller_events.try_recv() {
        if let CallEvent::MediaNotice { notice, .. } = event {
            outcome.caller_notices.push(notice);
        }
    }
    outcome.caller_state = Some(caller.state());
    outcome.callee_state = Some(callee.state());

    caller.stop().await;
    callee.stop().await;
    for printer in printers {
        printer.abort();
    }
    Ok(outcome)
}

async fn drive(caller: &CallService, callee: &CallService, options: &DemoOptions) -> Result<DemoOutcome> {
    let mut outcome = DemoOutcome::default();
    let notifier = callee.notifier();
    let mut pending = notifier.watch();

    caller.call(ParticipantId::new(options.callee.as_str())?).await?;
    tokio::time::timeout(STEP_TIMEOUT, pending.wait_for(Option::is_some))
        .await
        .context("Callee never saw the offer")?
        .map(|_| ())
        .context("Callee stopped publishing offers")?;

    if options.decline {
        notifier.decline().await?;
        wait_for_state(caller.store().watch_state(), CallState::Ended, "caller").await?;
        return Ok(outcome);
    }

    notifier.accept().await?;
    wait_for_state(caller.store().watch_state(), CallState::Connected, "caller").await?;
    wait_for_state(callee.store().watch_state(), CallState::Connected, "callee").await?;
    outcome.connected = true;
    outcome.caller_audio_only = caller.store().session().is_some_and(|s| s.is_audio_only);
    outcome.callee_audio_only = callee.store().session().is_some_and(|s| s.is_audio_only);

    tokio::time::sleep(options.hold).await;
    caller.hang_up().await;
    wait_for_state(callee.store().watch_state(), CallState::Ended, "callee").await?;
    Ok(outcome)
}
