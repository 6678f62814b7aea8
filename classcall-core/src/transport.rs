//! Transport layer implementations
//!
//! [`MemoryHub`] is an in-process stand-in for a hosted realtime broadcast
//! service: every subscriber of a topic sees every frame published on it,
//! including its own. Faults can be injected to exercise reconnection.

use crate::signaling::{FrameStream, SignalingTransport};
use async_trait::async_trait;
use futures::{future, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// Frames buffered per topic before slow subscribers start lagging
const HUB_CAPACITY: usize = 256;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not subscribe
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Could not publish
    #[error("Send error: {0}")]
    SendError(String),

    /// Subscription broke
    #[error("Receive error: {0}")]
    ReceiveError(String),
}

#[derive(Debug, Clone)]
enum HubFrame {
    Message(String),
    Fault(String),
}

#[derive(Debug)]
struct HubInner {
    topics: Mutex<HashMap<String, broadcast::Sender<HubFrame>>>,
    online: AtomicBool,
    subscriptions: AtomicUsize,
}

impl HubInner {
    fn topic(&self, topic: &str) -> broadcast::Sender<HubFrame> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(HUB_CAPACITY).0)
            .clone()
    }
}

/// In-process broadcast service
#[derive(Debug, Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    /// Create an online hub with no topics
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: Mutex::new(HashMap::new()),
                online: AtomicBool::new(true),
                subscriptions: AtomicUsize::new(0),
            }),
        }
    }

    /// Transport handle for one participant
    #[must_use]
    pub fn client(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.inner.clone(),
        }
    }

    /// Break every open subscription; subscribers must resubscribe
    pub fn interrupt(&self) {
        let topics = self.inner.topics.lock();
        for (topic, tx) in topics.iter() {
            tracing::debug!(topic = %topic, "Interrupting subscribers");
            let _ = tx.send(HubFrame::Fault("subscription interrupted".to_string()));
        }
    }

    /// Take the hub offline or bring it back
    ///
    /// Going offline also interrupts open subscriptions.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::Release);
        if !online {
            self.interrupt();
        }
    }

    /// Successful subscribe calls since creation
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.load(Ordering::Acquire)
    }

    /// Open receivers on a topic
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// One participant's handle on a [`MemoryHub`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: Arc<HubInner>,
}

impl MemoryTransport {
    fn ensure_online(&self) -> Result<(), String> {
        if self.hub.online.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err("hub offline".to_string())
        }
    }
}

#[async_trait]
impl SignalingTransport for MemoryTransport {
    async fn subscribe(&self, topic: &str) -> Result<FrameStream, TransportError> {
        self.ensure_online().map_err(TransportError::ConnectionError)?;

        let rx = self.hub.topic(topic).subscribe();
        self.hub.subscriptions.fetch_add(1, Ordering::AcqRel);

        let frames = BroadcastStream::new(rx).filter_map(|item| {
            future::ready(match item {
                Ok(HubFrame::Message(frame)) => Some(Ok(frame)),
                Ok(HubFrame::Fault(reason)) => Some(Err(TransportError::ReceiveError(reason))),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Signaling subscriber lagged");
                    None
                }
            })
        });
        Ok(frames.boxed())
    }

    async fn publish(&self, topic: &str, frame: String) -> Result<(), TransportError> {
        self.ensure_online().map_err(TransportError::SendError)?;
        // No subscribers is not an error for a broadcast topic
        let _ = self.hub.topic(topic).send(HubFrame::Message(frame));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = MemoryHub::new();
        let a = hub.client();
        let b = hub.client();

        let mut a_frames = a.subscribe("room").await.unwrap();
        let mut b_frames = b.subscribe("room").await.unwrap();
        assert_eq!(hub.subscriber_count("room"), 2);

        a.publish("room", "hello".to_string()).await.unwrap();
        assert_eq!(a_frames.next().await, Some(Ok("hello".to_string())));
        assert_eq!(b_frames.next().await, Some(Ok("hello".to_string())));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = MemoryHub::new();
        let client = hub.client();
        let mut other = client.subscribe("other").await.unwrap();
        let mut room = client.subscribe("room").await.unwrap();

        client.publish("room", "x".to_string()).await.unwrap();
        assert_eq!(room.next().await, Some(Ok("x".to_string())));

        client.publish("other", "y".to_string()).await.unwrap();
        assert_eq!(other.next().await, Some(Ok("y".to_string())));
    }

    #[tokio::test]
    async fn test_interrupt_and_offline() {
        let hub = MemoryHub::new();
        let client = hub.client();
        let mut frames = client.subscribe("room").await.unwrap();

        hub.set_online(false);
        assert!(matches!(
            frames.next().await,
            Some(Err(TransportError::ReceiveError(_)))
        ));
        assert!(matches!(
            client.subscribe("room").await,
            Err(TransportError::ConnectionError(_))
        ));
        assert!(matches!(
            client.publish("room", "x".to_string()).await,
            Err(TransportError::SendError(_))
        ));

        hub.set_online(true);
        assert!(client.subscribe("room").await.is_ok());
        assert_eq!(hub.subscription_count(), 2);
    }
}
