use core::fmt;

use crate::slice::Slice;
use crate::{Column, Result};

/// An ordered write set applied atomically by [`Database::apply`].
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

#[derive(Debug)]
pub enum BatchOp {
    Put {
        column: Column,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        column: Column,
        key: Vec<u8>,
    },
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            column,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete {
            column,
            key: key.into(),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Backend cursor: positions on seek and steps forward in key order.
pub trait DbIter: Send {
    /// Position at the first entry with key ≥ `key` and return it.
    fn seek(&mut self, key: &[u8]) -> Result<Option<(Box<[u8]>, Box<[u8]>)>>;

    /// Step to the next entry.
    fn next(&mut self) -> Result<Option<(Box<[u8]>, Box<[u8]>)>>;
}

/// Column iterator handed out by [`Database::iter`].
pub struct Iter<'a> {
    inner: Box<dyn DbIter + 'a>,
}

impl fmt::Debug for Iter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Iter")
    }
}

impl<'a> Iter<'a> {
    #[must_use]
    pub fn new(inner: Box<dyn DbIter + 'a>) -> Self {
        Self { inner }
    }

    pub fn seek(&mut self, key: &[u8]) -> Result<Option<(Box<[u8]>, Box<[u8]>)>> {
        self.inner.seek(key)
    }

    pub fn next(&mut self) -> Result<Option<(Box<[u8]>, Box<[u8]>)>> {
        self.inner.next()
    }

    /// Entries whose keys start with `prefix`, beginning at the first such
    /// key. Iteration stops at the first key outside the prefix.
    #[must_use]
    pub fn prefixed(self, prefix: Vec<u8>) -> PrefixEntries<'a> {
        PrefixEntries {
            iter: self,
            prefix,
            start: None,
            started: false,
            done: false,
        }
    }

    /// Entries starting at `start` while keys remain under `prefix`; used
    /// for time-bounded index scans where the start key is deeper than the
    /// prefix itself.
    #[must_use]
    pub fn prefixed_from(self, prefix: Vec<u8>, start: Vec<u8>) -> PrefixEntries<'a> {
        PrefixEntries {
            iter: self,
            prefix,
            start: Some(start),
            started: false,
            done: false,
        }
    }
}

/// Iterator adapter enforcing a key prefix.
pub struct PrefixEntries<'a> {
    iter: Iter<'a>,
    prefix: Vec<u8>,
    start: Option<Vec<u8>>,
    started: bool,
    done: bool,
}

impl fmt::Debug for PrefixEntries<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixEntries")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl Iterator for PrefixEntries<'_> {
    type Item = Result<(Box<[u8]>, Box<[u8]>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let step = if self.started {
            self.iter.next()
        } else {
            self.started = true;
            let start = self.start.take().unwrap_or_else(|| self.prefix.clone());
            self.iter.seek(&start)
        };

        match step {
            Ok(Some((key, value))) => {
                if key.starts_with(&self.prefix) {
                    Some(Ok((key, value)))
                } else {
                    self.done = true;
                    None
                }
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Keyed storage with prefix scans and atomic batches. Implementations
/// must make `apply` all-or-nothing with respect to concurrent readers.
pub trait Database: Send + Sync + 'static {
    fn has(&self, column: Column, key: &[u8]) -> Result<bool>;

    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Slice<'static>>>;

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, column: Column, key: &[u8]) -> Result<()>;

    fn iter(&self, column: Column) -> Result<Iter<'_>>;

    fn apply(&self, batch: Batch) -> Result<()>;
}
