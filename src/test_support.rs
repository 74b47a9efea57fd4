//! Shared test support utilities
//!
//! `InMemoryBroker` implements the broker ports with the semantics the
//! pipeline relies on: durable queue declaration, per-consumer prefetch, manual ack and nack-with-requeue, and requeue of
//! unacknowledged deliveries when a session closes. `StaticProbe` returns
//! fixed host metrics.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::domain::SystemSample;
use crate::error::BrokerError;
use crate::port::{BrokerClient, BrokerSession, Delivery, DeliveryStream, SystemProbe};

#[derive(Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    redelivered: bool,
}

struct Unacked {
    message: StoredMessage,
    session_id: u64,
}

#[derive(Default)]
struct QueueState {
    durable: bool,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, Unacked>,
    max_in_flight: usize,
    requested_prefetch: Option<u16>,
    acked: usize,
    requeued: usize,
}

struct BrokerState {
    reachable: bool,
    failing_connects: u32,
    fail_publishes: bool,
    connect_attempts: u32,
    next_session_id: u64,
    open_sessions: HashSet<u64>,
    next_tag: u64,
    consumers_cancelled: bool,
    queues: HashMap<String, QueueState>,
}

struct Shared {
    state: Mutex<BrokerState>,
    changed: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Broker double for unit and integration tests.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState {
                    reachable: true,
                    failing_connects: 0,
                    fail_publishes: false,
                    connect_attempts: 0,
                    next_session_id: 1,
                    open_sessions: HashSet::new(),
                    next_tag: 1,
                    consumers_cancelled: false,
                    queues: HashMap::new(),
                }),
                changed: Notify::new(),
            }),
        }
    }

    pub fn client(&self) -> Arc<dyn BrokerClient> {
        Arc::new(self.clone())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.shared.state().reachable = reachable;
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.shared.state().failing_connects = count;
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.shared.state().fail_publishes = fail;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.shared.state().connect_attempts
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.state().open_sessions.len()
    }

    /// `Some(durable)` if the queue has been declared.
    pub fn queue_durability(&self, queue: &str) -> Option<bool> {
        self.shared.state().queues.get(queue).map(|q| q.durable)
    }

    /// Pre-create a non-durable queue to provoke a declaration mismatch.
    pub fn declare_transient_queue(&self, queue: &str) {
        self.shared
            .state()
            .queues
            .entry(queue.to_string())
            .or_default();
    }

    /// Enqueue raw bytes as if another publisher had sent them.
    pub fn inject(&self, queue: &str, payload: &[u8]) {
        let mut state = self.shared.state();
        let entry = state.queues.entry(queue.to_string()).or_insert_with(|| QueueState {
            durable: true,
            ..QueueState::default()
        });
        entry.ready.push_back(StoredMessage {
            payload: payload.to_vec(),
            redelivered: false,
        });
        drop(state);
        self.shared.changed.notify_waiters();
    }

    /// Payloads waiting for delivery, in queue order.
    pub fn ready_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with_queue(queue, |q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Prefetch count requested by the most recent consumer of `queue`.
    pub fn requested_prefetch(&self, queue: &str) -> Option<u16> {
        self.with_queue(queue, |q| q.requested_prefetch).flatten()
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.unacked.len()).unwrap_or(0)
    }

    /// Highest number of simultaneously unacknowledged deliveries seen.
    pub fn max_in_flight(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.max_in_flight).unwrap_or(0)
    }

    pub fn acked_count(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.acked).unwrap_or(0)
    }

    pub fn requeued_count(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.requeued).unwrap_or(0)
    }

    /// End every active delivery stream, as a broker-side consumer cancel does.
    pub fn cancel_consumers(&self) {
        self.shared.state().consumers_cancelled = true;
        self.shared.changed.notify_waiters();
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> Option<T> {
        self.shared.state().queues.get(queue).map(f)
    }
}

impl BrokerClient for InMemoryBroker {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn BrokerSession>, BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            state.connect_attempts += 1;
            if !state.reachable {
                return Err(BrokerError::Connect("connection refused".into()));
            }
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(BrokerError::Connect("connection reset by peer".into()));
            }

            let id = state.next_session_id;
            state.next_session_id += 1;
            state.open_sessions.insert(id);

            Ok(Box::new(MemorySession {
                shared: self.shared.clone(),
                id,
            }) as Box<dyn BrokerSession>)
        })
    }
}

struct MemorySession {
    shared: Arc<Shared>,
    id: u64,
}

impl BrokerSession for MemorySession {
    fn declare_durable_queue<'a>(
        &'a self,
        queue: &'a str,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            match state.queues.get(queue) {
                Some(existing) if !existing.durable => Err(BrokerError::Declare {
                    queue: queue.to_string(),
                    reason: "PRECONDITION_FAILED - inequivalent arg 'durable'".into(),
                }),
                Some(_) => Ok(()),
                None => {
                    state.queues.insert(
                        queue.to_string(),
                        QueueState {
                            durable: true,
                            ..QueueState::default()
                        },
                    );
                    Ok(())
                }
            }
        })
    }

    fn publish_persistent<'a>(
        &'a self,
        queue: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            {
                let mut state = self.shared.state();
                if state.fail_publishes {
                    return Err(BrokerError::Publish("channel closed".into()));
                }
                let target = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| BrokerError::Publish(format!("no queue '{queue}'")))?;
                target.ready.push_back(StoredMessage {
                    payload: payload.to_vec(),
                    redelivered: false,
                });
            }
            self.shared.changed.notify_waiters();
            Ok(())
        })
    }

    fn consume<'a>(
        &'a self,
        queue: &'a str,
        prefetch: u16,
    ) -> BoxFuture<'a, Result<Box<dyn DeliveryStream>, BrokerError>> {
        Box::pin(async move {
            match self.shared.state().queues.get_mut(queue) {
                Some(target) => target.requested_prefetch = Some(prefetch),
                None => return Err(BrokerError::Consume(format!("no queue '{queue}'"))),
            }
            Ok(Box::new(MemoryDeliveryStream {
                shared: self.shared.clone(),
                session_id: self.id,
                queue: queue.to_string(),
                prefetch: usize::from(prefetch.max(1)),
            }) as Box<dyn DeliveryStream>)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), BrokerError>> {
        Box::pin(async move {
            {
                let mut state = self.shared.state();
                state.open_sessions.remove(&self.id);
                for queue in state.queues.values_mut() {
                    let mut orphaned: Vec<u64> = queue
                        .unacked
                        .iter()
                        .filter(|(_, u)| u.session_id == self.id)
                        .map(|(tag, _)| *tag)
                        .collect();
                    orphaned.sort_unstable();
                    for tag in orphaned.into_iter().rev() {
                        if let Some(mut entry) = queue.unacked.remove(&tag) {
                            entry.message.redelivered = true;
                            queue.ready.push_front(entry.message);
                        }
                    }
                }
            }
            self.shared.changed.notify_waiters();
            Ok(())
        })
    }
}

struct MemoryDeliveryStream {
    shared: Arc<Shared>,
    session_id: u64,
    queue: String,
    prefetch: usize,
}

impl MemoryDeliveryStream {
    fn try_take(&self) -> Option<Option<Result<Box<dyn Delivery>, BrokerError>>> {
        let mut state = self.shared.state();
        if state.consumers_cancelled || !state.open_sessions.contains(&self.session_id) {
            return Some(None);
        }

        let tag = state.next_tag;
        let queue = state.queues.get_mut(&self.queue)?;
        let in_flight = queue
            .unacked
            .values()
            .filter(|u| u.session_id == self.session_id)
            .count();
        if in_flight >= self.prefetch {
            return None;
        }
        let message = queue.ready.pop_front()?;

        queue.unacked.insert(
            tag,
            Unacked {
                message: message.clone(),
                session_id: self.session_id,
            },
        );
        queue.max_in_flight = queue.max_in_flight.max(queue.unacked.len());
        state.next_tag += 1;

        Some(Some(Ok(Box::new(MemoryDelivery {
            shared: self.shared.clone(),
            queue: self.queue.clone(),
            tag,
            payload: message.payload,
            redelivered: message.redelivered,
        }) as Box<dyn Delivery>)))
    }
}

impl DeliveryStream for MemoryDeliveryStream {
    fn next_delivery(
        &mut self,
    ) -> BoxFuture<'_, Option<Result<Box<dyn Delivery>, BrokerError>>> {
        Box::pin(async move {
            loop {
                let changed = self.shared.changed.notified();
                tokio::pin!(changed);
                changed.as_mut().enable();

                if let Some(next) = self.try_take() {
                    return next;
                }
                changed.await;
            }
        })
    }
}

struct MemoryDelivery {
    shared: Arc<Shared>,
    queue: String,
    tag: u64,
    payload: Vec<u8>,
    redelivered: bool,
}

impl MemoryDelivery {
    fn settle(&self, requeue: bool) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state();
            let queue = state
                .queues
                .get_mut(&self.queue)
                .ok_or_else(|| BrokerError::Acknowledge(format!("no queue '{}'", self.queue)))?;
            let mut entry = queue.unacked.remove(&self.tag).ok_or_else(|| {
                BrokerError::Acknowledge(format!("unknown delivery tag {}", self.tag))
            })?;
            if requeue {
                entry.message.redelivered = true;
                queue.ready.push_front(entry.message);
                queue.requeued += 1;
            } else {
                queue.acked += 1;
            }
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<(), BrokerError>> {
        Box::pin(async move { self.settle(false) })
    }

    fn nack_requeue(self: Box<Self>) -> BoxFuture<'static, Result<(), BrokerError>> {
        Box::pin(async move { self.settle(true) })
    }
}

/// System probe returning the same sample every time.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe(pub SystemSample);

impl StaticProbe {
    /// A probe reporting the given memory and disk percentages.
    pub fn with_pressure(memory_percent: f64, disk_percent: f64) -> Self {
        let mut sample = SystemSample::default();
        sample.memory.percent = memory_percent;
        sample.disk.percent = disk_percent;
        Self(sample)
    }
}

impl SystemProbe for StaticProbe {
    fn sample(&self) -> BoxFuture<'_, SystemSample> {
        let sample = self.0;
        Box::pin(async move { sample })
    }
}
