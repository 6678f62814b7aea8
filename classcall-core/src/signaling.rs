//! Signaling protocol and channel
//!
//! All participants share one broadcast topic. A [`SignalMessage`] travels as
//! a JSON envelope `{kind, payload, from, to, callId}`; `to` is either a
//! participant id or `""` for broadcast. The channel delivers every message
//! on the topic, own messages included; addressing is the receiver's job.

use crate::config::SignalingConfig;
use crate::identity::ParticipantId;
use crate::transport::TransportError;
use crate::types::{CallId, EndReason, IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Maximum encoded message size (64KB)
pub const MAX_SIGNALING_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum SDP string length
pub const MAX_SDP_LENGTH: usize = 32 * 1024;

/// Maximum ICE candidate line length
pub const MAX_CANDIDATE_LENGTH: usize = 1024;

/// Raw frames from a subscription
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Signaling errors
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message could not be encoded or decoded
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Message exceeds a size limit
    #[error("Message too large: {field} is {size} bytes (max {max})")]
    MessageTooLarge {
        /// Offending part
        field: &'static str,
        /// Actual size
        size: usize,
        /// Limit
        max: usize,
    },

    /// Pump stopped before reporting
    #[error("Signaling channel closed")]
    Closed,
}

/// Realtime broadcast primitive
///
/// Implement this for the hosted backend's channel API. Subscriptions yield
/// every frame published on the topic; a transport error or end of stream
/// means the subscription is gone and must be renewed.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Subscribe to a topic
    async fn subscribe(&self, topic: &str) -> Result<FrameStream, TransportError>;

    /// Publish one frame to a topic
    async fn publish(&self, topic: &str, frame: String) -> Result<(), TransportError>;
}

/// Message kind as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// Session offer
    Offer,
    /// Session answer
    Answer,
    /// Trickled ICE candidate
    IceCandidate,
    /// Hang up, decline or cancel
    EndCall,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::EndCall => "end-call",
        };
        f.write_str(s)
    }
}

/// Typed message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Caller's session description
    Offer(SessionDescription),
    /// Callee's session description
    Answer(SessionDescription),
    /// Candidate for the remote peer
    IceCandidate(IceCandidate),
    /// Call over
    EndCall {
        /// Why, if the sender said
        reason: Option<EndReason>,
    },
}

impl Signal {
    /// Wire kind
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Offer(_) => SignalKind::Offer,
            Self::Answer(_) => SignalKind::Answer,
            Self::IceCandidate(_) => SignalKind::IceCandidate,
            Self::EndCall { .. } => SignalKind::EndCall,
        }
    }
}

/// Signaling message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct SignalMessage {
    /// Body
    pub signal: Signal,
    /// Sender
    pub from: ParticipantId,
    /// Recipient id, or `""` for broadcast
    pub to: String,
    /// Call the message belongs to
    pub call_id: CallId,
}

impl SignalMessage {
    /// Build a message
    pub fn new(signal: Signal, from: ParticipantId, to: impl Into<String>, call_id: CallId) -> Self {
        Self {
            signal,
            from,
            to: to.into(),
            call_id,
        }
    }

    /// Wire kind
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.signal.kind()
    }

    /// Whether `me` should apply this message
    #[must_use]
    pub fn is_addressed_to(&self, me: &ParticipantId) -> bool {
        me.accepts_recipient(&self.to)
    }

    /// Encode for publishing
    ///
    /// # Errors
    ///
    /// Returns error if the message is invalid or too large
    pub fn encode(&self) -> Result<String, SignalingError> {
        self.validate()?;
        let frame = serde_json::to_string(self).map_err(SignalingError::Malformed)?;
        check_size("message", frame.len(), MAX_SIGNALING_MESSAGE_SIZE)?;
        Ok(frame)
    }

    /// Decode and validate a received frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is too large, malformed, or violates limits
    pub fn decode(frame: &str) -> Result<Self, SignalingError> {
        check_size("message", frame.len(), MAX_SIGNALING_MESSAGE_SIZE)?;
        let message: Self = serde_json::from_str(frame).map_err(SignalingError::Malformed)?;
        message.validate()?;
        Ok(message)
    }

    /// Check payload size limits
    ///
    /// # Errors
    ///
    /// Returns error naming the first field over its limit
    pub fn validate(&self) -> Result<(), SignalingError> {
        match &self.signal {
            Signal::Offer(desc) | Signal::Answer(desc) => {
                check_size("sdp", desc.sdp.len(), MAX_SDP_LENGTH)
            }
            Signal::IceCandidate(c) => {
                check_size("candidate", c.candidate.len(), MAX_CANDIDATE_LENGTH)
            }
            Signal::EndCall { .. } => Ok(()),
        }
    }
}

fn check_size(field: &'static str, size: usize, max: usize) -> Result<(), SignalingError> {
    if size > max {
        return Err(SignalingError::MessageTooLarge { field, size, max });
    }
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EndCallPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<EndReason>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WirePayload {
    Description(SessionDescription),
    Candidate(IceCandidate),
    EndCall(EndCallPayload),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    kind: SignalKind,
    #[serde(default)]
    payload: Option<WirePayload>,
    from: ParticipantId,
    #[serde(default)]
    to: String,
    call_id: CallId,
}

impl From<SignalMessage> for WireEnvelope {
    fn from(message: SignalMessage) -> Self {
        let kind = message.kind();
        let payload = match message.signal {
            Signal::Offer(desc) | Signal::Answer(desc) => Some(WirePayload::Description(desc)),
            Signal::IceCandidate(c) => Some(WirePayload::Candidate(c)),
            Signal::EndCall { reason: None } => None,
            Signal::EndCall { reason } => Some(WirePayload::EndCall(EndCallPayload { reason })),
        };
        Self {
            kind,
            payload,
            from: message.from,
            to: message.to,
            call_id: message.call_id,
        }
    }
}

impl TryFrom<WireEnvelope> for SignalMessage {
    type Error = String;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let signal = match (wire.kind, wire.payload) {
            (SignalKind::Offer, Some(WirePayload::Description(d))) if d.sdp_type == SdpType::Offer => {
                Signal::Offer(d)
            }
            (SignalKind::Answer, Some(WirePayload::Description(d))) if d.sdp_type == SdpType::Answer => {
                Signal::Answer(d)
            }
            (SignalKind::IceCandidate, Some(WirePayload::Candidate(c))) => Signal::IceCandidate(c),
            (SignalKind::EndCall, None) => Signal::EndCall { reason: None },
            (SignalKind::EndCall, Some(WirePayload::EndCall(p))) => Signal::EndCall { reason: p.reason },
            (kind, _) => return Err(format!("payload does not match kind {}", kind)),
        };
        Ok(Self {
            signal,
            from: wire.from,
            to: wire.to,
            call_id: wire.call_id,
        })
    }
}

/// Subscription to the shared signaling topic
///
/// One background pump owns the subscription and renews it after a fixed
/// delay whenever it breaks. Decoded messages go to a single receiver.
pub struct SignalingChannel {
    transport: Arc<dyn SignalingTransport>,
    config: SignalingConfig,
    inbound_tx: mpsc::UnboundedSender<SignalMessage>,
    inbound_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SignalMessage>>>,
    pump: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    connected: Arc<AtomicBool>,
}

impl SignalingChannel {
    /// Create an unconnected channel
    pub fn new(transport: Arc<dyn SignalingTransport>, config: SignalingConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            config,
            inbound_tx,
            inbound_rx: parking_lot::Mutex::new(Some(inbound_rx)),
            pump: tokio::sync::Mutex::new(None),
            shutdown,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Topic this channel uses
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Start the pump; no-op while one is already running
    ///
    /// The pump keeps retrying in the background even when the first
    /// attempt fails.
    ///
    /// # Errors
    ///
    /// Returns the first subscription attempt's error
    #[tracing::instrument(skip(self), fields(topic = %self.config.topic))]
    pub async fn connect(&self) -> Result<(), SignalingError> {
        let mut pump = self.pump.lock().await;
        if pump.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        self.shutdown.send_replace(false);
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = Pump {
            transport: self.transport.clone(),
            config: self.config.clone(),
            inbound: self.inbound_tx.clone(),
            shutdown: self.shutdown.subscribe(),
            connected: self.connected.clone(),
        };
        *pump = Some(tokio::spawn(worker.run(ready_tx)));
        drop(pump);

        match ready_rx.await {
            Ok(outcome) => outcome.map_err(SignalingError::from),
            Err(_) => Err(SignalingError::Closed),
        }
    }

    /// Whether a subscription is currently open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Publish a message; failures are logged and returned, not retried
    ///
    /// # Errors
    ///
    /// Returns error if encoding or publishing fails
    #[tracing::instrument(skip(self, message), fields(kind = %message.kind(), to = %message.to, call_id = %message.call_id))]
    pub async fn send(&self, message: &SignalMessage) -> Result<(), SignalingError> {
        let frame = message.encode()?;
        if let Err(e) = self.transport.publish(&self.config.topic, frame).await {
            tracing::warn!(error = %e, "Failed to publish signaling message");
            return Err(e.into());
        }
        tracing::debug!("Sent signaling message");
        Ok(())
    }

    /// Take the inbound receiver; `None` until it is handed back
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<SignalMessage>> {
        self.inbound_rx.lock().take()
    }

    /// Hand back a receiver obtained from [`Self::take_receiver`]
    pub fn restore_receiver(&self, receiver: mpsc::UnboundedReceiver<SignalMessage>) {
        *self.inbound_rx.lock() = Some(receiver);
    }

    /// Stop the pump
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.connected.store(false, Ordering::Release);
        tracing::info!(topic = %self.config.topic, "Signaling channel shut down");
    }
}

struct Pump {
    transport: Arc<dyn SignalingTransport>,
    config: SignalingConfig,
    inbound: mpsc::UnboundedSender<SignalMessage>,
    shutdown: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
}

impl Pump {
    async fn run(mut self, ready: oneshot::Sender<Result<(), TransportError>>) {
        let mut ready = Some(ready);
        let delay = self.config.reconnect_delay();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.transport.subscribe(&self.config.topic).await {
                Ok(frames) => {
                    self.connected.store(true, Ordering::Release);
                    tracing::info!(topic = %self.config.topic, "Subscribed to signaling topic");
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Ok(()));
                    }
                    let stop = self.forward(frames).await;
                    self.connected.store(false, Ordering::Release);
                    if stop {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, topic = %self.config.topic, "Signaling subscribe failed");
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Err(e));
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.changed() => break,
                () = tokio::time::sleep(delay) => {
                    tracing::info!(delay_ms = delay.as_millis(), "Reconnecting to signaling topic");
                }
            }
        }
        tracing::debug!("Signaling pump stopped");
    }

    /// Forward frames until the subscription breaks; `true` means shut down
    async fn forward(&mut self, mut frames: FrameStream) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return true,
                frame = frames.next() => match frame {
                    Some(Ok(raw)) => match SignalMessage::decode(&raw) {
                        Ok(message) => {
                            tracing::trace!(kind = %message.kind(), from = %message.from, "Received signaling message");
                            // Receiver dropped means nobody handles signals anymore
                            if self.inbound.send(message).is_err() {
                                return true;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Dropping malformed signaling message"),
                    },
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Signaling subscription broke");
                        return false;
                    }
                    None => {
                        tracing::warn!("Signaling subscription ended");
                        return false;
                    }
                },
            }
        }
    }
}
