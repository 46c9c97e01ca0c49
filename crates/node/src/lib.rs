//! The composition root. [`Engine`] owns the stores, the subscription
//! dispatcher and the transfer locks, and is handed to every protocol
//! endpoint explicitly; nothing in the relay is a process-wide global.

use std::sync::Arc;

use nectar_blobstore::BlobStore;
use nectar_dagstore::DagStore;
use nectar_eventstore::{EventStore, EventStoreError, PutOutcome};
use nectar_primitives::{Event, Filter};
use nectar_store::Database;
use nectar_sync::{RootLocks, SyncConfig};

pub mod streams;
pub mod subscriptions;

pub use streams::serve_streams;
pub use subscriptions::{ConnectionId, OutboundQueue, SubscriptionEvent, SubscriptionRegistry};

/// Operational limits shared by the protocol surfaces.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Outbound queue depth per connection before drop-oldest kicks in.
    pub queue_capacity: usize,
    /// MIME allow-list for blob uploads; empty allows everything.
    pub allowed_mime: Vec<String>,
    /// Transfer timeouts and busy-root policy.
    pub sync: SyncConfig,
    /// Signed-envelope freshness window, seconds either side of now.
    pub auth_window_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            allowed_mime: Vec::new(),
            sync: SyncConfig::default(),
            auth_window_secs: 60,
        }
    }
}

/// The data-plane engine: event store, DAG store, blob store and the
/// subscription dispatcher over one shared database.
pub struct Engine {
    events: EventStore,
    dags: DagStore,
    blobs: BlobStore,
    subscriptions: SubscriptionRegistry,
    locks: RootLocks,
    limits: Limits,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connections", &self.subscriptions.connection_count())
            .finish_non_exhaustive()
    }
}

impl Engine {
    #[must_use]
    pub fn new(db: Arc<dyn Database>, limits: Limits) -> Self {
        // DAG leaves and blobs share the content keyspace, so their
        // refcount cycles serialize over one lock.
        let content_lock = Arc::new(parking_lot::Mutex::new(()));

        Self {
            events: EventStore::new(Arc::clone(&db)),
            dags: DagStore::with_write_lock(Arc::clone(&db), Arc::clone(&content_lock)),
            blobs: BlobStore::with_write_lock(db, content_lock),
            subscriptions: SubscriptionRegistry::new(limits.queue_capacity),
            locks: RootLocks::new(),
            limits,
        }
    }

    #[must_use]
    pub fn events(&self) -> &EventStore {
        &self.events
    }

    #[must_use]
    pub fn dags(&self) -> &DagStore {
        &self.dags
    }

    #[must_use]
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    #[must_use]
    pub fn locks(&self) -> &RootLocks {
        &self.locks
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Inbound event pipeline: validate and store, then fan out to
    /// subscriptions. Dispatch happens strictly after the commit, and
    /// ephemeral events are dispatched without ever touching the store.
    pub fn submit_event(&self, event: &Event) -> Result<PutOutcome, EventStoreError> {
        self.submit_event_at(event, nectar_primitives::unix_now())
    }

    pub fn submit_event_at(
        &self,
        event: &Event,
        now: u64,
    ) -> Result<PutOutcome, EventStoreError> {
        let outcome = self.events.put_at(event, now)?;

        match outcome {
            PutOutcome::Stored | PutOutcome::Ephemeral => self.subscriptions.dispatch(event),
            PutOutcome::Duplicate => {}
        }

        Ok(outcome)
    }

    /// Historical query across several filters, as issued by `REQ`.
    pub fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, EventStoreError> {
        self.events.query_many(filters)
    }
}

#[cfg(test)]
mod tests {
    use nectar_crypto::{sign_event, SecretKey};
    use nectar_primitives::Kind;
    use nectar_store::InMemoryDB;

    use super::*;

    const NOW: u64 = 1_700_000_100;

    fn engine() -> Engine {
        Engine::new(Arc::new(InMemoryDB::new()), Limits::default())
    }

    fn kind_filter(kind: u32) -> Filter {
        Filter {
            kinds: Some(vec![Kind(kind)]),
            ..Filter::default()
        }
    }

    #[tokio::test]
    async fn stored_events_reach_matching_subscriptions() {
        let engine = engine();
        let (conn, queue) = engine.subscriptions().register();
        engine.subscriptions().subscribe(conn, "s", vec![kind_filter(1)]);

        let secret = SecretKey::generate();
        let event = sign_event(&secret, NOW - 1, Kind(1), vec![], "hi").expect("sign");

        assert_eq!(
            engine.submit_event_at(&event, NOW).expect("submit"),
            PutOutcome::Stored
        );

        let delivered = queue.pop().await.expect("delivery");
        assert_eq!(delivered.event.id, event.id);

        // A duplicate submit is acknowledged but not re-dispatched.
        assert_eq!(
            engine.submit_event_at(&event, NOW).expect("submit"),
            PutOutcome::Duplicate
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn ephemeral_events_dispatch_without_persisting() {
        let engine = engine();
        let (conn, queue) = engine.subscriptions().register();
        engine
            .subscriptions()
            .subscribe(conn, "s", vec![kind_filter(25_000)]);

        let secret = SecretKey::generate();
        let event = sign_event(&secret, NOW - 1, Kind(25_000), vec![], "live").expect("sign");

        assert_eq!(
            engine.submit_event_at(&event, NOW).expect("submit"),
            PutOutcome::Ephemeral
        );

        let delivered = queue.pop().await.expect("delivered exactly once");
        assert_eq!(delivered.event.id, event.id);
        assert!(queue.is_empty());

        // Nothing was persisted for later queries.
        assert!(engine
            .query(&[kind_filter(25_000)])
            .expect("query")
            .is_empty());
        assert!(engine.events().get(&event.id).expect("get").is_none());
    }

    #[tokio::test]
    async fn rejected_events_do_not_dispatch() {
        let engine = engine();
        let (conn, queue) = engine.subscriptions().register();
        engine.subscriptions().subscribe(conn, "s", vec![Filter::default()]);

        let secret = SecretKey::generate();
        let mut event = sign_event(&secret, NOW - 1, Kind(1), vec![], "tampered").expect("sign");
        event.content = "changed".to_owned();

        assert!(engine.submit_event_at(&event, NOW).is_err());
        assert!(queue.is_empty());
    }
}
