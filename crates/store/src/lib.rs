//! The embedded key-value layer every store in the relay sits on: a
//! column-addressed [`Database`] trait with prefix iteration and atomic
//! batches, typed key encodings, and an in-memory backend for tests and
//! ephemeral deployments. The RocksDB backend lives in
//! `nectar-store-rocksdb`.

pub mod db;
pub mod key;
pub mod memory;
pub mod slice;

pub use db::{Batch, BatchOp, Database, DbIter, Iter, PrefixEntries};
pub use memory::InMemoryDB;
pub use slice::Slice;

use strum::{EnumIter, IntoStaticStr};
use thiserror::Error;

/// Keyspaces of the relay, one column family per variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Column {
    /// `id` → event JSON bytes.
    Events,
    /// `pubkey ‖ kind ‖ ts_desc ‖ id` → ().
    AuthorIndex,
    /// `kind ‖ ts_desc ‖ id` → ().
    KindIndex,
    /// `name ‖ value ‖ ts_desc ‖ id` → (); single-letter tag names only.
    TagIndex,
    /// `pubkey ‖ kind ‖ d` → current event id.
    Addressable,
    /// `id` → moderation marker JSON.
    Moderation,
    /// `root ‖ 0x00 ‖ leaf_hash` → leaf CBOR without inline content.
    Leaf,
    /// `sha256` → raw bytes, shared by DAG leaves and blobs.
    Content,
    /// `sha256` → big-endian u64 reference count.
    ContentRefs,
    /// `root ‖ 0x00 ‖ label` → leaf hash.
    Label,
    /// `root ‖ 0x00 ‖ pubkey` → ownership record JSON.
    Owner,
    /// `pubkey ‖ 0x00 ‖ root` → ().
    OwnerRoots,
    /// `sha256` → blob metadata JSON.
    BlobMeta,
}

impl Column {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("malformed key in column `{}`", column.name())]
    MalformedKey { column: Column },
}

pub type Result<T> = std::result::Result<T, StoreError>;
