//! RocksDB backend for [`nectar_store::Database`]: one column family per
//! [`Column`], `WriteBatch`-backed atomic applies.

use camino::Utf8Path;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DBRawIterator, Options, WriteBatch, DB};
use strum::IntoEnumIterator;

use nectar_store::db::{Batch, BatchOp, Database, DbIter, Iter};
use nectar_store::{Column, Result, Slice, StoreError};

#[derive(Debug)]
pub struct RocksDB {
    db: DB,
}

impl RocksDB {
    /// Open (creating if missing) the database at `path` with every
    /// relay column family.
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors: Vec<_> = Column::iter()
            .map(|column| ColumnFamilyDescriptor::new(column.name(), Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path.as_std_path(), descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { db })
    }

    fn cf(&self, column: Column) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(column.name())
            .ok_or_else(|| StoreError::Backend(format!("missing column family {}", column.name())))
    }
}

struct RocksIter<'a> {
    inner: DBRawIterator<'a>,
}

impl RocksIter<'_> {
    fn current(&self) -> Result<Option<(Box<[u8]>, Box<[u8]>)>> {
        if self.inner.valid() {
            let entry = self
                .inner
                .item()
                .map(|(k, v)| (k.to_vec().into_boxed_slice(), v.to_vec().into_boxed_slice()));
            Ok(entry)
        } else {
            self.inner
                .status()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(None)
        }
    }
}

impl DbIter for RocksIter<'_> {
    fn seek(&mut self, key: &[u8]) -> Result<Option<(Box<[u8]>, Box<[u8]>)>> {
        self.inner.seek(key);
        self.current()
    }

    fn next(&mut self) -> Result<Option<(Box<[u8]>, Box<[u8]>)>> {
        if self.inner.valid() {
            self.inner.next();
        }
        self.current()
    }
}

impl Database for RocksDB {
    fn has(&self, column: Column, key: &[u8]) -> Result<bool> {
        Ok(self.get(column, key)?.is_some())
    }

    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Slice<'static>>> {
        let cf = self.cf(column)?;

        self.db
            .get_cf(cf, key)
            .map(|value| value.map(Slice::from))
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf(column)?;

        self.db
            .put_cf(cf, key, value)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<()> {
        let cf = self.cf(column)?;

        self.db
            .delete_cf(cf, key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn iter(&self, column: Column) -> Result<Iter<'_>> {
        let cf = self.cf(column)?;

        Ok(Iter::new(Box::new(RocksIter {
            inner: self.db.raw_iterator_cf(cf),
        })))
    }

    fn apply(&self, batch: Batch) -> Result<()> {
        let mut write_batch = WriteBatch::default();

        for op in batch.ops() {
            match op {
                BatchOp::Put { column, key, value } => {
                    write_batch.put_cf(self.cf(*column)?, key, value);
                }
                BatchOp::Delete { column, key } => {
                    write_batch.delete_cf(self.cf(*column)?, key);
                }
            }
        }

        self.db
            .write(write_batch)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use nectar_store::Batch;

    use super::*;

    fn open_temp() -> (tempfile::TempDir, RocksDB) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8Path::from_path(dir.path()).expect("utf-8 path").to_owned();
        let db = RocksDB::open(&path).expect("open");
        (dir, db)
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let (_dir, db) = open_temp();

        db.put(Column::Events, b"key1", b"Hello, World").expect("put");

        assert!(db.has(Column::Events, b"key1").expect("has"));
        assert_eq!(
            &*db.get(Column::Events, b"key1").expect("get").expect("present"),
            b"Hello, World"
        );

        db.put(Column::Events, b"key1", b"Some Other Value").expect("put");
        assert_eq!(
            &*db.get(Column::Events, b"key1").expect("get").expect("present"),
            b"Some Other Value"
        );

        db.delete(Column::Events, b"key1").expect("delete");
        assert!(!db.has(Column::Events, b"key1").expect("has"));
    }

    #[test]
    fn prefix_scan_matches_memory_semantics() {
        let (_dir, db) = open_temp();

        db.put(Column::Label, b"root\x00a", b"1").expect("put");
        db.put(Column::Label, b"root\x00b", b"2").expect("put");
        db.put(Column::Label, b"rope\x00a", b"3").expect("put");

        let values: Vec<_> = db
            .iter(Column::Label)
            .expect("iter")
            .prefixed(b"root\x00".to_vec())
            .map(|entry| entry.expect("entry").1)
            .collect();

        assert_eq!(values.len(), 2);
        assert_eq!(&*values[0], b"1");
        assert_eq!(&*values[1], b"2");
    }

    #[test]
    fn batch_is_atomic_across_columns() {
        let (_dir, db) = open_temp();

        let mut batch = Batch::new();
        batch.put(Column::Events, b"id".to_vec(), b"event".to_vec());
        batch.put(Column::KindIndex, b"k".to_vec(), Vec::new());
        batch.delete(Column::Events, b"missing".to_vec());

        db.apply(batch).expect("apply");

        assert!(db.has(Column::Events, b"id").expect("has"));
        assert!(db.has(Column::KindIndex, b"k").expect("has"));
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8Path::from_path(dir.path()).expect("utf-8 path").to_owned();

        {
            let db = RocksDB::open(&path).expect("open");
            db.put(Column::Events, b"persisted", b"yes").expect("put");
        }

        let db = RocksDB::open(&path).expect("reopen");
        assert_eq!(
            &*db.get(Column::Events, b"persisted")
                .expect("get")
                .expect("present"),
            b"yes"
        );
    }
}
