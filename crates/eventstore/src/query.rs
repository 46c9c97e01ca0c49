use std::collections::HashSet;

use nectar_primitives::{Event, EventId, Filter, Kind, Pubkey};
use nectar_store::{key, Column};

use crate::{EventStore, EventStoreError};

impl EventStore {
    /// Evaluate one filter: pick the most selective index available
    /// (ids > tag > author+kind > kind > scan), stream candidates
    /// newest-first, re-check every predicate in memory, stop at the
    /// effective limit.
    pub fn query(&self, filter: &Filter) -> Result<Vec<Event>, EventStoreError> {
        let limit = filter.effective_limit();

        let mut events = if let Some(ids) = &filter.ids {
            self.by_ids(ids, filter)?
        } else if let Some((name, values)) = first_indexed_tag(filter) {
            self.by_tag(name, values, filter, limit)?
        } else if let Some(authors) = &filter.authors {
            self.by_authors(authors, filter, limit)?
        } else if let Some(kinds) = &filter.kinds {
            self.by_kinds(kinds, filter, limit)?
        } else {
            self.by_scan(filter)?
        };

        order_events(&mut events);
        events.truncate(limit);

        Ok(events)
    }

    /// Union of several filters, deduplicated by id, newest-first.
    pub fn query_many(&self, filters: &[Filter]) -> Result<Vec<Event>, EventStoreError> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();

        for filter in filters {
            for event in self.query(filter)? {
                if seen.insert(event.id) {
                    events.push(event);
                }
            }
        }

        order_events(&mut events);
        Ok(events)
    }

    fn by_ids(&self, ids: &[EventId], filter: &Filter) -> Result<Vec<Event>, EventStoreError> {
        let mut events = Vec::with_capacity(ids.len());

        for id in ids {
            if let Some(event) = self.get(id)? {
                if filter.matches(&event) {
                    events.push(event);
                }
            }
        }

        Ok(events)
    }

    fn by_tag(
        &self,
        name: &str,
        values: &[String],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError> {
        let mut events = Vec::new();

        for value in values {
            let prefix = key::tag_prefix(name, value);
            let ids = self.scan_index(Column::TagIndex, prefix, filter, limit)?;
            self.collect_matching(&ids, filter, &mut events)?;
        }

        Ok(events)
    }

    fn by_authors(
        &self,
        authors: &[Pubkey],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError> {
        let mut events = Vec::new();

        for author in authors {
            if let Some(kinds) = &filter.kinds {
                for kind in kinds {
                    let prefix = key::author_kind_prefix(author, *kind);
                    let ids = self.scan_index(Column::AuthorIndex, prefix, filter, limit)?;
                    self.collect_matching(&ids, filter, &mut events)?;
                }
            } else {
                // Author-only scans are kind-major, so time ordering comes
                // from the final sort; collect without the per-scan cap.
                let prefix = key::author_prefix(author);
                let ids =
                    self.scan_index(Column::AuthorIndex, prefix, filter, usize::MAX)?;
                self.collect_matching(&ids, filter, &mut events)?;
            }
        }

        Ok(events)
    }

    fn by_kinds(
        &self,
        kinds: &[Kind],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError> {
        let mut events = Vec::new();

        for kind in kinds {
            let prefix = key::kind_prefix(*kind);
            let ids = self.scan_index(Column::KindIndex, prefix, filter, limit)?;
            self.collect_matching(&ids, filter, &mut events)?;
        }

        Ok(events)
    }

    fn by_scan(&self, filter: &Filter) -> Result<Vec<Event>, EventStoreError> {
        let mut events = Vec::new();

        let mut iter = self.db().iter(Column::Events)?;
        let mut entry = iter.seek(&[])?;

        while let Some((_key, value)) = entry {
            let event: Event = serde_json::from_slice(&value)
                .map_err(|e| EventStoreError::Corrupt(e.to_string()))?;

            if filter.matches(&event) {
                events.push(event);
            }

            entry = iter.next()?;
        }

        Ok(events)
    }

    /// Walk an index prefix newest-first within the filter's time bounds,
    /// collecting up to `cap` candidate ids.
    fn scan_index(
        &self,
        column: Column,
        prefix: Vec<u8>,
        filter: &Filter,
        cap: usize,
    ) -> Result<Vec<EventId>, EventStoreError> {
        let since = filter.since.unwrap_or(0);
        let until = filter.until.unwrap_or(u64::MAX);

        // Seek straight to the newest admissible timestamp. When the
        // prefix covers multiple timestamp runs (author-only scans) this
        // start key still lands at or before every prefixed entry.
        let mut start = prefix.clone();
        if column != Column::AuthorIndex || prefix.len() > 32 {
            start.extend_from_slice(&key::ts_desc(until));
        }

        let mut ids = Vec::new();

        for entry in self.db().iter(column)?.prefixed_from(prefix, start) {
            let (index_key, _value) = entry?;
            let created_at = key::ts_before_id(column, &index_key)?;

            if created_at > until {
                continue;
            }
            if created_at < since && cap != usize::MAX {
                break;
            }
            if created_at < since {
                continue;
            }

            ids.push(key::id_suffix(column, &index_key)?);

            if ids.len() >= cap {
                break;
            }
        }

        Ok(ids)
    }

    fn collect_matching(
        &self,
        ids: &[EventId],
        filter: &Filter,
        out: &mut Vec<Event>,
    ) -> Result<(), EventStoreError> {
        for id in ids {
            if let Some(event) = self.get(id)? {
                if filter.matches(&event) {
                    out.push(event);
                }
            }
        }

        Ok(())
    }
}

/// Newest-first; equal timestamps break toward the lexicographically
/// smaller id, matching replacement order. Duplicates by id collapse.
pub fn order_events(events: &mut Vec<Event>) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    events.dedup_by(|a, b| a.id == b.id);
}

/// First single-letter tag criterion usable against the tag index.
fn first_indexed_tag(filter: &Filter) -> Option<(&str, &[String])> {
    filter
        .tags
        .iter()
        .find(|(name, values)| name.len() == 1 && name.is_ascii() && !values.is_empty())
        .map(|(name, values)| (name.as_str(), values.as_slice()))
}
