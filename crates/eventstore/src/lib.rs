//! Event persistence: validation, the five secondary indices maintained
//! atomically with every write, replaceable/addressable replacement,
//! deletion events, and filter-driven queries.
//!
//! The store is neutral with respect to moderation markers: queries
//! return events exactly as stored, and [`EventStore::batch_blocked_check`]
//! lets higher layers decide what to elide.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use nectar_primitives::{
    Event, EventId, Kind, KindCategory, ModerationMarker, Pubkey, EARLIEST_CREATED_AT,
    MAX_FUTURE_SKEW_SECS,
};
use nectar_store::{key, Batch, Column, Database, StoreError};

mod query;

pub use query::order_events;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("invalid: id does not match the canonical hash")]
    IdMismatch,

    #[error("invalid: signature does not verify")]
    BadSignature,

    #[error("invalid: created_at is too far in the future")]
    CreatedAtInFuture,

    #[error("invalid: created_at predates the protocol epoch")]
    CreatedAtBeforeEpoch,

    #[error("replaced: a newer event exists for this replacement key")]
    ReplacedByNewer,

    #[error("error: {0}")]
    Store(#[from] StoreError),

    #[error("error: corrupt stored event: {0}")]
    Corrupt(String),
}

/// What `put` did with an accepted event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// Persisted (possibly replacing older siblings).
    Stored,
    /// Valid ephemeral-kind event; acknowledged, never persisted.
    Ephemeral,
    /// Already present; accepting again is a no-op.
    Duplicate,
}

#[derive(Clone)]
pub struct EventStore {
    db: Arc<dyn Database>,
    // Serializes read-modify-write cycles (replacement, deletion) so
    // index maintenance stays consistent under concurrent writers.
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventStore")
    }
}

impl EventStore {
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn db(&self) -> &dyn Database {
        &*self.db
    }

    /// Kind-range routing; pure and stateless.
    #[must_use]
    pub fn categorize(kind: Kind) -> KindCategory {
        kind.category()
    }

    /// Validate and store an event against the current clock.
    pub fn put(&self, event: &Event) -> Result<PutOutcome, EventStoreError> {
        self.put_at(event, nectar_primitives::unix_now())
    }

    /// Validate and store an event as of `now`; the clock is explicit so
    /// timestamp-sanity behavior is testable.
    pub fn put_at(&self, event: &Event, now: u64) -> Result<PutOutcome, EventStoreError> {
        validate(event, now)?;

        match event.kind.category() {
            KindCategory::Ephemeral => Ok(PutOutcome::Ephemeral),
            KindCategory::Regular => self.put_regular(event),
            KindCategory::Replaceable => self.put_replaceable(event),
            KindCategory::Addressable => self.put_addressable(event),
        }
    }

    fn put_regular(&self, event: &Event) -> Result<PutOutcome, EventStoreError> {
        let _guard = self.write_lock.lock();

        if self.db.has(Column::Events, &key::event(&event.id))? {
            return Ok(PutOutcome::Duplicate);
        }

        let mut batch = Batch::new();
        insert_event(&mut batch, event)?;

        if event.kind == Kind::DELETION {
            self.apply_deletion_tags(&mut batch, event)?;
        }

        self.db.apply(batch)?;

        debug!(id = %event.id, kind = %event.kind, "stored event");
        Ok(PutOutcome::Stored)
    }

    fn put_replaceable(&self, event: &Event) -> Result<PutOutcome, EventStoreError> {
        let _guard = self.write_lock.lock();

        if self.db.has(Column::Events, &key::event(&event.id))? {
            return Ok(PutOutcome::Duplicate);
        }

        let siblings = self.events_by_author_kind(&event.pubkey, event.kind)?;

        let mut batch = Batch::new();

        for sibling in &siblings {
            if sibling.supersedes(event) {
                return Err(EventStoreError::ReplacedByNewer);
            }
            remove_event(&mut batch, sibling);
        }

        insert_event(&mut batch, event)?;
        self.db.apply(batch)?;

        debug!(id = %event.id, kind = %event.kind, replaced = siblings.len(), "stored replaceable event");
        Ok(PutOutcome::Stored)
    }

    fn put_addressable(&self, event: &Event) -> Result<PutOutcome, EventStoreError> {
        let _guard = self.write_lock.lock();

        if self.db.has(Column::Events, &key::event(&event.id))? {
            return Ok(PutOutcome::Duplicate);
        }

        let address = key::addressable(&event.pubkey, event.kind, event.d_tag());
        let current = self
            .db
            .get(Column::Addressable, &address)?
            .map(|value| decode_id(&value))
            .transpose()?
            .map(|id| self.get(&id))
            .transpose()?
            .flatten();

        let mut batch = Batch::new();

        if let Some(current) = current {
            if current.supersedes(event) {
                return Err(EventStoreError::ReplacedByNewer);
            }
            remove_event(&mut batch, &current);
        }

        insert_event(&mut batch, event)?;
        self.db.apply(batch)?;

        debug!(id = %event.id, kind = %event.kind, d = event.d_tag(), "stored addressable event");
        Ok(PutOutcome::Stored)
    }

    /// Remove an event and its index rows. Unknown ids are not an error.
    pub fn delete(&self, id: &EventId) -> Result<(), EventStoreError> {
        let _guard = self.write_lock.lock();

        let Some(event) = self.get(id)? else {
            return Ok(());
        };

        let mut batch = Batch::new();
        remove_event(&mut batch, &event);
        self.db.apply(batch)?;

        debug!(%id, "deleted event");
        Ok(())
    }

    pub fn get(&self, id: &EventId) -> Result<Option<Event>, EventStoreError> {
        self.db
            .get(Column::Events, &key::event(id))?
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| EventStoreError::Corrupt(e.to_string()))
            })
            .transpose()
    }

    /// Sparse true-only map; ids without a blocked marker are absent.
    pub fn batch_blocked_check(
        &self,
        ids: &[EventId],
    ) -> Result<HashMap<EventId, bool>, EventStoreError> {
        let mut out = HashMap::new();

        for id in ids {
            if let Some(marker) = self.marker(id)? {
                if marker.is_blocked() {
                    let _prev = out.insert(*id, true);
                }
            }
        }

        Ok(out)
    }

    pub fn marker(&self, id: &EventId) -> Result<Option<ModerationMarker>, EventStoreError> {
        self.db
            .get(Column::Moderation, &key::event(id))?
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| EventStoreError::Corrupt(e.to_string()))
            })
            .transpose()
    }

    /// Written by external moderation collaborators; the core never calls
    /// this on its own behalf.
    pub fn set_marker(
        &self,
        id: &EventId,
        marker: &ModerationMarker,
    ) -> Result<(), EventStoreError> {
        let bytes =
            serde_json::to_vec(marker).map_err(|e| EventStoreError::Corrupt(e.to_string()))?;
        self.db.put(Column::Moderation, &key::event(id), &bytes)?;
        Ok(())
    }

    pub fn clear_marker(&self, id: &EventId) -> Result<(), EventStoreError> {
        self.db.delete(Column::Moderation, &key::event(id))?;
        Ok(())
    }

    /// Kind-5 semantics: every `e` tag deletes the referenced event iff
    /// its author matches the deletion author; `a` tags address the
    /// current replaceable holder the same way. Non-matching tags are
    /// silently ignored.
    fn apply_deletion_tags(
        &self,
        batch: &mut Batch,
        deletion: &Event,
    ) -> Result<(), EventStoreError> {
        for tag in &deletion.tags {
            match tag.name() {
                Some("e") => {
                    let Some(id) = tag.value().and_then(|v| v.parse::<EventId>().ok()) else {
                        continue;
                    };

                    if let Some(target) = self.get(&id)? {
                        if target.pubkey == deletion.pubkey {
                            remove_event(batch, &target);
                        }
                    }
                }
                Some("a") => {
                    let Some((kind, pubkey, d_value)) = tag.value().and_then(parse_address) else {
                        continue;
                    };

                    if pubkey != deletion.pubkey {
                        continue;
                    }

                    let address = key::addressable(&pubkey, kind, &d_value);
                    let current = self
                        .db
                        .get(Column::Addressable, &address)?
                        .map(|value| decode_id(&value))
                        .transpose()?;

                    if let Some(target) = current.map(|id| self.get(&id)).transpose()?.flatten() {
                        remove_event(batch, &target);
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn events_by_author_kind(
        &self,
        pubkey: &Pubkey,
        kind: Kind,
    ) -> Result<Vec<Event>, EventStoreError> {
        let prefix = key::author_kind_prefix(pubkey, kind);
        let mut out = Vec::new();

        for entry in self.db.iter(Column::AuthorIndex)?.prefixed(prefix) {
            let (index_key, _value) = entry?;
            let id = key::id_suffix(Column::AuthorIndex, &index_key)?;

            if let Some(event) = self.get(&id)? {
                out.push(event);
            }
        }

        Ok(out)
    }
}

/// `kind:pubkey:d` coordinates from an `a` tag.
fn parse_address(value: &str) -> Option<(Kind, Pubkey, String)> {
    let mut parts = value.splitn(3, ':');

    let kind = parts.next()?.parse::<u32>().ok().map(Kind)?;
    let pubkey = parts.next()?.parse::<Pubkey>().ok()?;
    let d_value = parts.next().unwrap_or("").to_owned();

    Some((kind, pubkey, d_value))
}

fn decode_id(value: &[u8]) -> Result<EventId, EventStoreError> {
    let bytes: [u8; 32] = value.try_into().map_err(|_| {
        EventStoreError::Corrupt("addressable row does not hold an event id".to_owned())
    })?;

    Ok(EventId::from_bytes(bytes))
}

fn validate(event: &Event, now: u64) -> Result<(), EventStoreError> {
    if !event.id_matches() {
        return Err(EventStoreError::IdMismatch);
    }

    nectar_crypto::verify(&event.pubkey, event.id.as_bytes(), &event.sig)
        .map_err(|_| EventStoreError::BadSignature)?;

    if event.created_at > now + MAX_FUTURE_SKEW_SECS {
        return Err(EventStoreError::CreatedAtInFuture);
    }

    if event.created_at < EARLIEST_CREATED_AT {
        return Err(EventStoreError::CreatedAtBeforeEpoch);
    }

    nectar_primitives::kind::check_required_tags(event.kind, &event.tags)
        .map_err(|e| EventStoreError::Invalid(e.to_string()))?;

    Ok(())
}

/// Whether a tag name participates in the tag index. Longer names are
/// re-checked in memory at query time instead.
fn indexed_tag(name: &str) -> bool {
    name.len() == 1 && name.is_ascii()
}

fn insert_event(batch: &mut Batch, event: &Event) -> Result<(), EventStoreError> {
    let bytes = serde_json::to_vec(event).map_err(|e| EventStoreError::Corrupt(e.to_string()))?;

    batch.put(Column::Events, key::event(&event.id), bytes);
    batch.put(
        Column::AuthorIndex,
        key::author_index(&event.pubkey, event.kind, event.created_at, &event.id),
        Vec::new(),
    );
    batch.put(
        Column::KindIndex,
        key::kind_index(event.kind, event.created_at, &event.id),
        Vec::new(),
    );

    for tag in &event.tags {
        if let (Some(name), Some(value)) = (tag.name(), tag.value()) {
            if indexed_tag(name) {
                batch.put(
                    Column::TagIndex,
                    key::tag_index(name, value, event.created_at, &event.id),
                    Vec::new(),
                );
            }
        }
    }

    if event.kind.category() == KindCategory::Addressable {
        batch.put(
            Column::Addressable,
            key::addressable(&event.pubkey, event.kind, event.d_tag()),
            event.id.as_bytes().to_vec(),
        );
    }

    Ok(())
}

fn remove_event(batch: &mut Batch, event: &Event) {
    batch.delete(Column::Events, key::event(&event.id));
    batch.delete(
        Column::AuthorIndex,
        key::author_index(&event.pubkey, event.kind, event.created_at, &event.id),
    );
    batch.delete(
        Column::KindIndex,
        key::kind_index(event.kind, event.created_at, &event.id),
    );

    for tag in &event.tags {
        if let (Some(name), Some(value)) = (tag.name(), tag.value()) {
            if indexed_tag(name) {
                batch.delete(
                    Column::TagIndex,
                    key::tag_index(name, value, event.created_at, &event.id),
                );
            }
        }
    }

    if event.kind.category() == KindCategory::Addressable {
        batch.delete(
            Column::Addressable,
            key::addressable(&event.pubkey, event.kind, event.d_tag()),
        );
    }
}
