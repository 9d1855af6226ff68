//! Pub/sub fan-out for operation events and per-operation log chunks.
//!
//! Subscribe returns a [`Subscription`] guard: dropping it unsubscribes.
//! Callback/publish work always snapshots the subscriber list and releases
//! the map lock before touching any individual queue, so a slow or dropped
//! subscriber can never block the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use fleetops_provider::LogStream;
use fleetops_types::{Operation, OperationId};
use tokio::sync::{Mutex, Notify};

use crate::bounded_queue::{BoundedQueue, PushResult};

/// A progress event published after every store-visible state transition.
/// `snapshot` carries the full (unsanitized) operation record — the service
/// shell is responsible for stripping `plan_id`/`steps` before handing this
/// to a client.
#[derive(Debug, Clone)]
pub struct OperationEvent {
    pub ts: DateTime<Utc>,
    pub snapshot: Operation,
    pub message: String,
}

/// A chunk of step output attributed to one operation.
#[derive(Debug, Clone)]
pub struct LogChunk {
    pub ts: DateTime<Utc>,
    pub operation_id: OperationId,
    pub stream: LogStream,
    pub data: Vec<u8>,
}

struct SubscriberState<T> {
    queue: BoundedQueue<T>,
    notify: Notify,
}

/// Recommended per-subscriber buffer size (§4.6: "a bounded buffer...
/// is required; when full, the chunk/event is dropped").
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

/// A keyed map of subscribers with monotonically increasing ids.
pub struct EventBus<T> {
    subscribers: Mutex<HashMap<u64, Arc<SubscriberState<T>>>>,
    next_id: AtomicU64,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> EventBus<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn subscribe(self: &Arc<Self>, capacity: usize) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(SubscriberState {
            queue: BoundedQueue::new(capacity),
            notify: Notify::new(),
        });
        self.subscribers.lock().await.insert(id, state.clone());
        Subscription {
            id,
            state,
            bus: Arc::downgrade(self),
        }
    }

    /// Publishes to every current subscriber. Drops the item for any
    /// subscriber whose queue is full, logging a warning — this method never
    /// blocks on a slow subscriber.
    pub async fn publish(&self, item: T) {
        let subscribers: Vec<Arc<SubscriberState<T>>> = {
            let map = self.subscribers.lock().await;
            map.values().cloned().collect()
        };
        for subscriber in subscribers {
            match subscriber.queue.try_push(item.clone()) {
                PushResult::Ok => subscriber.notify.notify_one(),
                PushResult::Backpressure(_) => {
                    tracing::warn!("subscriber queue full, dropping item");
                }
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    async fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().await.remove(&id);
    }
}

/// A live subscription to an [`EventBus`]. Dropping it unsubscribes
/// asynchronously (the removal happens on a spawned task, since `Drop`
/// cannot await).
pub struct Subscription<T: Send + Sync + 'static> {
    id: u64,
    state: Arc<SubscriberState<T>>,
    bus: Weak<EventBus<T>>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    /// Waits for the next item. Returns `None` once the bus has been
    /// dropped and the queue has been fully drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            if let Some(item) = self.state.queue.try_pop() {
                return Some(item);
            }
            if self.bus.upgrade().is_none() {
                return None;
            }
            self.state.notify.notified().await;
        }
    }
}

impl<T: Send + Sync + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let id = self.id;
            tokio::spawn(async move {
                bus.unsubscribe(id).await;
            });
        }
    }
}

/// Per-operation-id log fan-out. Each operation gets its own inner
/// [`EventBus`], created lazily on first subscribe/publish and cleaned up
/// once its subscriber count returns to zero.
#[derive(Default)]
pub struct LogBus {
    per_operation: Mutex<HashMap<OperationId, Arc<EventBus<LogChunk>>>>,
}

impl LogBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn subscribe(self: &Arc<Self>, operation_id: OperationId, capacity: usize) -> Subscription<LogChunk> {
        let bus = {
            let mut map = self.per_operation.lock().await;
            map.entry(operation_id).or_insert_with(EventBus::new).clone()
        };
        bus.subscribe(capacity).await
    }

    pub async fn publish(&self, operation_id: &OperationId, chunk: LogChunk) {
        let bus = {
            let map = self.per_operation.lock().await;
            map.get(operation_id).cloned()
        };
        if let Some(bus) = bus {
            bus.publish(chunk).await;
        }
    }

    /// Drops the inner bus for an operation once it is known to have no more
    /// log producers (the operation reached a terminal phase) and no
    /// lingering subscribers.
    pub async fn cleanup(&self, operation_id: &OperationId) {
        let mut map = self.per_operation.lock().await;
        let is_empty = match map.get(operation_id) {
            Some(bus) => bus.subscriber_count().await == 0,
            None => return,
        };
        if is_empty {
            map.remove(operation_id);
        }
    }
}
