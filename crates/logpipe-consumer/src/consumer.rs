// Self-healing consumption loop
//
// One session at a time. When a session is lost, the whole subscription is
// dropped and rebuilt from scratch in an explicit loop; each rebuild is a new
// generation. The batch writer is never touched by reconnects.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use logpipe_batch::{SubmitError, Submitter};
use logpipe_config::BrokerConfig;
use logpipe_core::decode_with_path;
use metrics::counter;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, Delivery, SubscribeOptions, Subscription};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("broker unreachable after {attempts} attempts: {source}")]
    StartupFailed {
        attempts: u32,
        #[source]
        source: BrokerError,
    },

    #[error("batch writer closed; consumption stopped")]
    WriterClosed,
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub subscribe: SubscribeOptions,
    /// Attempts allowed for the first session before giving up.
    pub connect_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n * backoff_step`.
    pub backoff_step: Duration,
    /// Ceiling for the reconnect delay after startup.
    pub max_backoff: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            subscribe: SubscribeOptions::default(),
            connect_attempts: 5,
            backoff_step: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ConsumerOptions {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            subscribe: SubscribeOptions {
                queue: config.queue.clone(),
                durable: config.durable,
                prefetch: config.prefetch,
                consumer_tag: config.connection_name.clone(),
            },
            connect_attempts: config.connect_attempts,
            backoff_step: config.connect_backoff(),
            max_backoff: config.max_reconnect_backoff(),
        }
    }
}

enum SessionEnd {
    Shutdown,
    WriterClosed,
    Lost(BrokerError),
}

pub struct ResilientConsumer<B> {
    broker: B,
    options: ConsumerOptions,
    generation: u64,
}

impl<B: Broker> ResilientConsumer<B> {
    pub fn new(broker: B, options: ConsumerOptions) -> Self {
        Self {
            broker,
            options,
            generation: 0,
        }
    }

    /// Sessions established so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Consume until `shutdown` resolves.
    ///
    /// Each delivery is decoded, handed to `submitter` and acknowledged once
    /// the writer has accepted it. Fails only when the first session cannot be
    /// established or when the writer stops accepting records.
    pub async fn start<F>(&mut self, submitter: Submitter, shutdown: F) -> Result<(), ConsumerError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        let mut subscription = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested before the broker session was established");
                return Ok(());
            }
            result = self.connect_initial() => result?,
        };

        loop {
            match self.consume(&mut subscription, &submitter, &mut shutdown).await {
                SessionEnd::Shutdown => {
                    info!(generation = self.generation, "Stopping consumer");
                    subscription.close().await;
                    return Ok(());
                }
                SessionEnd::WriterClosed => {
                    error!(
                        generation = self.generation,
                        "Batch writer closed; stopping consumer"
                    );
                    subscription.close().await;
                    return Err(ConsumerError::WriterClosed);
                }
                SessionEnd::Lost(err) => {
                    counter!("logpipe.consumer.session_lost", 1);
                    warn!(
                        generation = self.generation,
                        error = %err,
                        "Broker session lost; reconnecting"
                    );
                    subscription.close().await;

                    subscription = match self.reconnect(&mut shutdown).await {
                        Some(next) => next,
                        None => {
                            info!("Shutdown requested while reconnecting");
                            return Ok(());
                        }
                    };
                }
            }
        }
    }

    async fn connect_initial(&mut self) -> Result<Subscription, ConsumerError> {
        let attempts = self.options.connect_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.open_session(attempt).await {
                Ok(subscription) => return Ok(subscription),
                Err(err) if attempt >= attempts => {
                    error!(attempts, error = %err, "Giving up on broker connection");
                    return Err(ConsumerError::StartupFailed {
                        attempts,
                        source: err,
                    });
                }
                Err(err) => {
                    let delay = self.options.backoff_step.saturating_mul(attempt);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Broker connection failed; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Retry until a session is live. `None` means shutdown won the race.
    async fn reconnect<S>(&mut self, shutdown: &mut S) -> Option<Subscription>
    where
        S: Future<Output = ()> + Unpin,
    {
        let mut attempt: u32 = 1;
        loop {
            let delay = self
                .options
                .backoff_step
                .saturating_mul(attempt)
                .min(self.options.max_backoff);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Waiting before reconnecting to broker"
            );

            let result = tokio::select! {
                biased;
                _ = &mut *shutdown => return None,
                result = async {
                    sleep(delay).await;
                    self.open_session(attempt).await
                } => result,
            };

            match result {
                Ok(subscription) => return Some(subscription),
                Err(err) => {
                    warn!(attempt, error = %err, "Reconnect attempt failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    async fn open_session(&mut self, attempt: u32) -> Result<Subscription, BrokerError> {
        let subscription = self.broker.connect(&self.options.subscribe).await?;
        self.generation += 1;
        counter!("logpipe.consumer.sessions", 1);
        info!(
            generation = self.generation,
            attempt,
            queue = %self.options.subscribe.queue,
            prefetch = self.options.subscribe.prefetch,
            "Broker session established"
        );
        Ok(subscription)
    }

    async fn consume<S>(
        &self,
        subscription: &mut Subscription,
        submitter: &Submitter,
        shutdown: &mut S,
    ) -> SessionEnd
    where
        S: Future<Output = ()> + Unpin,
    {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = &mut *shutdown => return SessionEnd::Shutdown,
                lost = &mut subscription.lost => {
                    return SessionEnd::Lost(lost.unwrap_or(BrokerError::Closed));
                }
                next = subscription.deliveries.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(err)) => return SessionEnd::Lost(err),
                    None => return SessionEnd::Lost(BrokerError::Closed),
                },
            };

            if let Some(end) = self.handle(delivery, submitter).await {
                return end;
            }
        }
    }

    /// Decode, hand off, then settle the delivery.
    async fn handle(&self, delivery: Delivery, submitter: &Submitter) -> Option<SessionEnd> {
        let (record, path) = decode_with_path(delivery.payload());
        counter!("logpipe.consumer.deliveries", 1, "path" => path.as_str());
        debug!(
            generation = self.generation,
            path = path.as_str(),
            level = record.level(),
            "Received log message"
        );

        match submitter.submit(record).await {
            Ok(()) => match delivery.ack().await {
                Ok(()) => None,
                Err(err) => Some(SessionEnd::Lost(err)),
            },
            Err(SubmitError::Closed(_)) => {
                if let Err(err) = delivery.reject(true).await {
                    warn!(error = %err, "Failed to requeue message after writer closed");
                }
                Some(SessionEnd::WriterClosed)
            }
        }
    }
}
