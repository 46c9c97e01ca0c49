use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use nectar_primitives::{Event, Filter};

pub type ConnectionId = u64;

/// One matched event addressed to a subscription on its connection.
#[derive(Clone, Debug)]
pub struct SubscriptionEvent {
    pub subscription_id: String,
    pub event: Event,
}

struct QueueShared {
    buf: Mutex<VecDeque<SubscriptionEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Bounded outbound queue for one connection. When full, the oldest
/// buffered event is dropped and counted; the dispatcher never blocks
/// the store's commit path on a slow client.
#[derive(Clone)]
pub struct OutboundQueue {
    shared: Arc<QueueShared>,
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("capacity", &self.shared.capacity)
            .field("dropped", &self.shared.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                buf: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
                notify: Notify::new(),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn push(&self, item: SubscriptionEvent) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }

        {
            let mut buf = self.shared.buf.lock();

            if buf.len() >= self.shared.capacity {
                let _oldest = buf.pop_front();
                let _count = self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }

            buf.push_back(item);
        }

        self.shared.notify.notify_one();
    }

    /// Next buffered event; `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<SubscriptionEvent> {
        loop {
            let notified = self.shared.notify.notified();

            if let Some(item) = self.shared.buf.lock().pop_front() {
                return Some(item);
            }

            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    /// Events discarded because this subscriber was slow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.buf.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.buf.lock().is_empty()
    }
}

struct Connection {
    queue: OutboundQueue,
    subscriptions: HashMap<String, Vec<Filter>>,
}

/// Per-connection filter registry fanning newly committed events to
/// matching open subscriptions.
pub struct SubscriptionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity,
        }
    }

    /// Register a connection; the returned queue feeds its writer task.
    pub fn register(&self) -> (ConnectionId, OutboundQueue) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = OutboundQueue::new(self.queue_capacity);

        let _prev = self.connections.insert(
            id,
            Connection {
                queue: queue.clone(),
                subscriptions: HashMap::new(),
            },
        );

        trace!(connection = id, "connection registered");
        (id, queue)
    }

    /// Drop a connection and everything it subscribed to.
    pub fn unregister(&self, connection: ConnectionId) {
        if let Some((_id, conn)) = self.connections.remove(&connection) {
            conn.queue.close();
            trace!(connection, "connection unregistered");
        }
    }

    /// Open (or replace) a subscription.
    pub fn subscribe(&self, connection: ConnectionId, subscription_id: &str, filters: Vec<Filter>) {
        if let Some(mut conn) = self.connections.get_mut(&connection) {
            let _prev = conn
                .subscriptions
                .insert(subscription_id.to_owned(), filters);
            trace!(connection, subscription_id, "subscription opened");
        }
    }

    /// Close one subscription; returns whether it existed.
    pub fn unsubscribe(&self, connection: ConnectionId, subscription_id: &str) -> bool {
        self.connections
            .get_mut(&connection)
            .is_some_and(|mut conn| conn.subscriptions.remove(subscription_id).is_some())
    }

    /// Fan a committed event out to every matching open subscription.
    /// Each subscription receives the event at most once even when
    /// several of its filters match.
    pub fn dispatch(&self, event: &Event) {
        let mut matched = 0_usize;

        for conn in &self.connections {
            for (subscription_id, filters) in &conn.subscriptions {
                if filters.iter().any(|filter| filter.matches(event)) {
                    conn.queue.push(SubscriptionEvent {
                        subscription_id: subscription_id.clone(),
                        event: event.clone(),
                    });
                    matched += 1;
                }
            }
        }

        if matched > 0 {
            debug!(id = %event.id, subscriptions = matched, "dispatched event");
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn dropped(&self, connection: ConnectionId) -> Option<u64> {
        self.connections
            .get(&connection)
            .map(|conn| conn.queue.dropped())
    }
}
