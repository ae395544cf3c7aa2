//! Channel Transport
//!
//! Best-effort fan-out of envelopes to every other endpoint on a topic.
//! Nothing here orders, acknowledges, persists or retries: a subscriber that
//! falls behind loses messages.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::network::protocol::{EndpointId, Envelope, Frame};

/// Default per-topic buffer.
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// A topic endpoints can attach to.
pub trait Transport: Send + Sync + 'static {
    /// Topic name.
    fn topic(&self) -> &str;

    /// Attach a new endpoint with a fresh id.
    fn attach(&self) -> Endpoint;
}

// =============================================================================
// ENDPOINT
// =============================================================================

/// Sending half of an endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Publisher {
    id: EndpointId,
    outbound: broadcast::Sender<Frame>,
}

impl Publisher {
    /// Endpoint id stamped on every frame.
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, message: Envelope) {
        let kind = message.kind();
        let frame = Frame {
            origin: self.id,
            message,
        };
        if self.outbound.send(frame).is_err() {
            trace!(kind, "Published with no subscribers");
        }
    }
}

/// Receiving half of an endpoint.
#[derive(Debug)]
pub struct Subscription {
    id: EndpointId,
    inbound: broadcast::Receiver<Frame>,
}

impl Subscription {
    /// Next envelope published by any other endpoint.
    ///
    /// Returns `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.inbound.recv().await {
                Ok(frame) if frame.origin == self.id => continue,
                Ok(frame) => return Some(frame.message),
                Err(RecvError::Lagged(missed)) => {
                    warn!(endpoint = %short_id(&self.id), missed, "Subscriber lagged, messages lost");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// One participant's attachment to a topic.
#[derive(Debug)]
pub struct Endpoint {
    publisher: Publisher,
    subscription: Subscription,
}

impl Endpoint {
    /// Build an endpoint over an outbound and an inbound channel.
    pub fn new(outbound: broadcast::Sender<Frame>, inbound: broadcast::Receiver<Frame>) -> Self {
        let id = Uuid::new_v4();
        Self {
            publisher: Publisher { id, outbound },
            subscription: Subscription { id, inbound },
        }
    }

    /// Endpoint id.
    pub fn id(&self) -> EndpointId {
        self.publisher.id
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, message: Envelope) {
        self.publisher.publish(message);
    }

    /// Next envelope from another endpoint.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.subscription.recv().await
    }

    /// Separate the halves.
    pub fn split(self) -> (Publisher, Subscription) {
        (self.publisher, self.subscription)
    }
}

/// First 8 hex chars of an endpoint id, for logs.
pub fn short_id(id: &EndpointId) -> String {
    let mut s = id.simple().to_string();
    s.truncate(8);
    s
}

// =============================================================================
// LOCAL BUS
// =============================================================================

/// In-process topic shared by every endpoint attached to it.
#[derive(Debug, Clone)]
pub struct LocalBus {
    topic: String,
    tx: broadcast::Sender<Frame>,
}

impl LocalBus {
    /// Create a topic buffering up to `capacity` frames per subscriber.
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            topic: topic.into(),
            tx,
        }
    }

    /// Number of attached endpoints still listening.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Transport for LocalBus {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn attach(&self) -> Endpoint {
        Endpoint::new(self.tx.clone(), self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Submission;
    use chrono::DateTime;
    use std::time::Duration;
    use tokio::time::timeout;

    fn answer(name: &str) -> Envelope {
        Envelope::SubmitAnswer {
            submission: Submission::new(name, "A", DateTime::from_timestamp_millis(1).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_fan_out_skips_sender() {
        let bus = LocalBus::new("quiz", 16);
        let mut a = bus.attach();
        let mut b = bus.attach();
        let mut c = bus.attach();

        a.publish(answer("Alice"));

        assert_eq!(b.recv().await, Some(answer("Alice")));
        assert_eq!(c.recv().await, Some(answer("Alice")));

        let own = timeout(Duration::from_millis(50), a.recv()).await;
        assert!(own.is_err(), "sender must not see its own frame");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = LocalBus::new("quiz", 16);
        let (publisher, subscription) = bus.attach().split();
        drop(subscription);
        publisher.publish(answer("Alice"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_loses_oldest() {
        let bus = LocalBus::new("quiz", 2);
        let a = bus.attach();
        let mut b = bus.attach();

        for name in ["p1", "p2", "p3", "p4"] {
            a.publish(answer(name));
        }

        assert_eq!(b.recv().await, Some(answer("p3")));
        assert_eq!(b.recv().await, Some(answer("p4")));
    }

    #[test]
    fn test_short_id() {
        let id = Uuid::parse_str("0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(short_id(&id), "01234567");
    }
}
