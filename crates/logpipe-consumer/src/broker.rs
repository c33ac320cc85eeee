//! Broker seam: a session yields deliveries, a loss notification and a closer.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::oneshot;

/// Transient broker failures. None of these are fatal once the consumer has
/// started; the session is torn down and rebuilt.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connect(String),

    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    #[error("acknowledgement failed: {0}")]
    Ack(String),

    #[error("broker session closed")]
    Closed,
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), BrokerError>;
}

/// One message received from the broker.
pub struct Delivery {
    payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { payload, acker }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Queue and flow-control settings for a subscription.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub queue: String,
    pub durable: bool,
    /// Unacknowledged deliveries the broker may have in flight at once.
    pub prefetch: u16,
    pub consumer_tag: String,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            queue: "logs".to_string(),
            durable: true,
            prefetch: 1,
            consumer_tag: "logpipe".to_string(),
        }
    }
}

/// Releases the broker resources of a session.
#[async_trait]
pub trait SessionCloser: Send {
    async fn close(self: Box<Self>) -> Result<(), BrokerError>;
}

/// A live session owned by exactly one consumer.
pub struct Subscription {
    pub deliveries: BoxStream<'static, Result<Delivery, BrokerError>>,
    /// Resolves once when the underlying connection is lost. A dropped sender
    /// counts as a loss.
    pub lost: oneshot::Receiver<BrokerError>,
    pub closer: Box<dyn SessionCloser>,
}

impl Subscription {
    /// Close the session. Errors are logged at debug level and dropped.
    pub async fn close(self) {
        let Subscription {
            deliveries, closer, ..
        } = self;
        drop(deliveries);
        if let Err(e) = closer.close().await {
            tracing::debug!(error = %e, "Error while closing broker session");
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a fresh connection, declare the queue and start consuming.
    async fn connect(&self, options: &SubscribeOptions) -> Result<Subscription, BrokerError>;
}
