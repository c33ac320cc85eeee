// In-memory broker
//
// Behaves like a single queue with one live session at a time. Prefetch is
// enforced with a semaphore per session, unacked messages go back to the head
// of the queue when a session ends, and acks from a dead session fail the way
// they do on a closed AMQP channel.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};

use crate::broker::{
    Acknowledger, Broker, BrokerError, Delivery, SessionCloser, SubscribeOptions, Subscription,
};

#[derive(Debug)]
struct Session {
    generation: u64,
    lost: Option<oneshot::Sender<BrokerError>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_id: u64,
    ready: VecDeque<(u64, Vec<u8>)>,
    unacked: BTreeMap<u64, Vec<u8>>,
    acked: Vec<Vec<u8>>,
    rejected: Vec<(Vec<u8>, bool)>,
    session: Option<Session>,
    generations: u64,
    connect_attempts: usize,
    fail_connects: usize,
    last_options: Option<SubscribeOptions>,
}

impl BrokerState {
    fn is_live(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// End the current session, returning its unacked messages to the head of
    /// the queue in delivery order.
    fn end_session(&mut self) -> Option<Session> {
        let session = self.session.take()?;
        let unacked = std::mem::take(&mut self.unacked);
        for (id, payload) in unacked.into_iter().rev() {
            self.ready.push_front((id, payload));
        }
        Some(session)
    }
}

/// Queue double for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, payload: impl Into<Vec<u8>>) {
        {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.ready.push_back((id, payload.into()));
        }
        self.notify.notify_one();
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().fail_connects = count;
    }

    /// Drop the live session as if the connection died: the consumer is
    /// notified, unacked messages are requeued and later acks from that
    /// session fail.
    pub fn sever(&self) {
        let session = self.state.lock().end_session();
        if let Some(mut session) = session {
            if let Some(tx) = session.lost.take() {
                let _ = tx.send(BrokerError::ConnectionLost("connection severed".into()));
            }
        }
        self.notify.notify_one();
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Payloads acknowledged so far, in ack order.
    pub fn acked(&self) -> Vec<Vec<u8>> {
        self.state.lock().acked.clone()
    }

    pub fn acked_count(&self) -> usize {
        self.state.lock().acked.len()
    }

    /// Rejected payloads with their requeue flag.
    pub fn rejected(&self) -> Vec<(Vec<u8>, bool)> {
        self.state.lock().rejected.clone()
    }

    /// Messages waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    /// Sessions successfully opened.
    pub fn sessions_opened(&self) -> u64 {
        self.state.lock().generations
    }

    pub fn last_subscribe_options(&self) -> Option<SubscribeOptions> {
        self.state.lock().last_options.clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self, options: &SubscribeOptions) -> Result<Subscription, BrokerError> {
        let (lost_tx, lost_rx) = oneshot::channel();
        let (generation, replaced) = {
            let mut state = self.state.lock();
            state.connect_attempts += 1;
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(BrokerError::Connect("connection refused".into()));
            }

            let replaced = state.end_session();
            state.generations += 1;
            let generation = state.generations;
            state.session = Some(Session {
                generation,
                lost: Some(lost_tx),
            });
            state.last_options = Some(options.clone());
            (generation, replaced)
        };
        drop(replaced);

        let feed = SessionFeed {
            state: Arc::clone(&self.state),
            notify: Arc::clone(&self.notify),
            permits: Arc::new(Semaphore::new(usize::from(options.prefetch.max(1)))),
            generation,
        };

        Ok(Subscription {
            deliveries: feed.into_stream(),
            lost: lost_rx,
            closer: Box::new(MemoryCloser {
                state: Arc::clone(&self.state),
                notify: Arc::clone(&self.notify),
                generation,
            }),
        })
    }
}

struct SessionFeed {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    permits: Arc<Semaphore>,
    generation: u64,
}

impl SessionFeed {
    fn into_stream(self) -> stream::BoxStream<'static, Result<Delivery, BrokerError>> {
        stream::unfold(self, |feed| async move {
            let permit = match Arc::clone(&feed.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return None,
            };
            loop {
                let next = {
                    let mut state = feed.state.lock();
                    if !state.is_live(feed.generation) {
                        return None;
                    }
                    let next = state.ready.pop_front();
                    if let Some((id, payload)) = &next {
                        state.unacked.insert(*id, payload.clone());
                    }
                    next
                };

                if let Some((id, payload)) = next {
                    let acker = MemoryAcker {
                        state: Arc::clone(&feed.state),
                        notify: Arc::clone(&feed.notify),
                        generation: feed.generation,
                        id,
                        _permit: permit,
                    };
                    return Some((Ok(Delivery::new(payload, Box::new(acker))), feed));
                }

                feed.notify.notified().await;
            }
        })
        .boxed()
    }
}

struct MemoryAcker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    generation: u64,
    id: u64,
    _permit: OwnedSemaphorePermit,
}

impl MemoryAcker {
    fn settle(&self) -> Result<Vec<u8>, BrokerError> {
        let mut state = self.state.lock();
        if !state.is_live(self.generation) {
            return Err(BrokerError::Ack("channel closed".into()));
        }
        state
            .unacked
            .remove(&self.id)
            .ok_or_else(|| BrokerError::Ack(format!("unknown delivery {}", self.id)))
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let payload = self.settle()?;
        self.state.lock().acked.push(payload);
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
        let payload = self.settle()?;
        {
            let mut state = self.state.lock();
            state.rejected.push((payload.clone(), requeue));
            if requeue {
                state.ready.push_front((self.id, payload));
            }
        }
        self.notify.notify_one();
        Ok(())
    }
}

struct MemoryCloser {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    generation: u64,
}

#[async_trait]
impl SessionCloser for MemoryCloser {
    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        let ended = {
            let mut state = self.state.lock();
            if state.is_live(self.generation) {
                state.end_session()
            } else {
                None
            }
        };
        drop(ended);
        self.notify.notify_one();
        Ok(())
    }
}
