use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use strum::IntoEnumIterator;

use crate::db::{Batch, BatchOp, Database, DbIter, Iter};
use crate::slice::Slice;
use crate::{Column, Result};

type ColumnMap = BTreeMap<Box<[u8]>, Box<[u8]>>;

/// In-memory backend: one ordered map per column behind a single lock, so
/// batches are trivially atomic. Iterators work over a snapshot taken at
/// creation. Intended for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct InMemoryDB {
    columns: RwLock<HashMap<Column, ColumnMap>>,
}

impl InMemoryDB {
    #[must_use]
    pub fn new() -> Self {
        let columns = Column::iter().map(|c| (c, ColumnMap::new())).collect();

        Self {
            columns: RwLock::new(columns),
        }
    }
}

struct SnapshotIter {
    entries: Vec<(Box<[u8]>, Box<[u8]>)>,
    position: usize,
}

impl DbIter for SnapshotIter {
    fn seek(&mut self, key: &[u8]) -> Result<Option<(Box<[u8]>, Box<[u8]>)>> {
        self.position = self
            .entries
            .partition_point(|(entry_key, _)| entry_key.as_ref() < key);

        Ok(self.entries.get(self.position).cloned())
    }

    fn next(&mut self) -> Result<Option<(Box<[u8]>, Box<[u8]>)>> {
        self.position += 1;
        Ok(self.entries.get(self.position).cloned())
    }
}

impl Database for InMemoryDB {
    fn has(&self, column: Column, key: &[u8]) -> Result<bool> {
        let columns = self.columns.read();
        Ok(columns
            .get(&column)
            .is_some_and(|map| map.contains_key(key)))
    }

    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Slice<'static>>> {
        let columns = self.columns.read();
        Ok(columns
            .get(&column)
            .and_then(|map| map.get(key))
            .map(|value| Slice::from(value.clone())))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<()> {
        let mut columns = self.columns.write();
        let _prev = columns
            .entry(column)
            .or_default()
            .insert(key.into(), value.into());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<()> {
        let mut columns = self.columns.write();
        if let Some(map) = columns.get_mut(&column) {
            let _prev = map.remove(key);
        }
        Ok(())
    }

    fn iter(&self, column: Column) -> Result<Iter<'_>> {
        let columns = self.columns.read();
        let entries = columns
            .get(&column)
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(Iter::new(Box::new(SnapshotIter {
            entries,
            position: 0,
        })))
    }

    fn apply(&self, batch: Batch) -> Result<()> {
        let mut columns = self.columns.write();

        for op in batch.ops() {
            match op {
                BatchOp::Put { column, key, value } => {
                    let _prev = columns
                        .entry(*column)
                        .or_default()
                        .insert(key.as_slice().into(), value.as_slice().into());
                }
                BatchOp::Delete { column, key } => {
                    if let Some(map) = columns.get_mut(column) {
                        let _prev = map.remove(key.as_slice());
                    }
                }
            }
        }

        Ok(())
    }
}
