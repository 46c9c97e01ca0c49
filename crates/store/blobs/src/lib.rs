//! Flat content-addressed blob store. Bytes live in the shared `Content`
//! column keyed by raw SHA-256, so blobs and DAG chunks with identical
//! bytes deduplicate; a reference count keeps either path from purging
//! content the other still serves.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use nectar_primitives::Pubkey;
use nectar_store::{key, Batch, Column, Database, StoreError};

pub const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("empty body")]
    Empty,

    #[error("mime type `{0}` is not allowed")]
    MimeNotAllowed(String),

    #[error("blob not found")]
    NotFound,

    #[error("only the uploader may delete a blob")]
    NotUploader,

    #[error("corrupt blob metadata: {0}")]
    CorruptMeta(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Metadata row kept per blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub sha256: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime: String,
    pub uploader: Pubkey,
    pub uploaded_at: u64,
}

#[derive(Clone)]
pub struct BlobStore {
    db: Arc<dyn Database>,
    // Serializes content-refcount read-modify-write cycles; shared with
    // the DAG store, which writes the same Content/ContentRefs rows.
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlobStore")
    }
}

impl BlobStore {
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self::with_write_lock(db, Arc::new(Mutex::new(())))
    }

    #[must_use]
    pub fn with_write_lock(db: Arc<dyn Database>, write_lock: Arc<Mutex<()>>) -> Self {
        Self { db, write_lock }
    }

    /// Store a blob: rejects empty bodies and disallowed MIME types,
    /// detects the type server-side, deduplicates on content hash.
    /// Re-uploading an existing blob is idempotent and returns the
    /// original descriptor.
    pub fn put(
        &self,
        bytes: &[u8],
        uploader: Pubkey,
        allowed_mime: &[String],
        now: u64,
    ) -> Result<BlobDescriptor, BlobError> {
        if bytes.is_empty() {
            return Err(BlobError::Empty);
        }

        let mime = detect_mime(bytes);

        if !allowed_mime.is_empty() && !allowed_mime.iter().any(|m| m == mime) {
            return Err(BlobError::MimeNotAllowed(mime.to_owned()));
        }

        let hash: [u8; 32] = Sha256::digest(bytes).into();
        let meta_key = key::blob_meta(&hash);

        let _guard = self.write_lock.lock();

        if let Some(existing) = self.db.get(Column::BlobMeta, &meta_key)? {
            return serde_json::from_slice(&existing)
                .map_err(|e| BlobError::CorruptMeta(e.to_string()));
        }

        let descriptor = BlobDescriptor {
            sha256: hex::encode(hash),
            size: bytes.len() as u64,
            mime: mime.to_owned(),
            uploader,
            uploaded_at: now,
        };

        let meta = serde_json::to_vec(&descriptor)
            .map_err(|e| BlobError::CorruptMeta(e.to_string()))?;

        let refs = content_refs(&*self.db, &hash)?;

        let mut batch = Batch::new();
        if refs == 0 {
            batch.put(Column::Content, key::content(&hash), bytes.to_vec());
        }
        batch.put(
            Column::ContentRefs,
            key::content(&hash),
            (refs + 1).to_be_bytes().to_vec(),
        );
        batch.put(Column::BlobMeta, meta_key, meta);

        self.db.apply(batch)?;

        debug!(hash = %descriptor.sha256, size = descriptor.size, mime = %descriptor.mime, "stored blob");

        Ok(descriptor)
    }

    pub fn get(&self, hash: &[u8; 32]) -> Result<Vec<u8>, BlobError> {
        if !self.db.has(Column::BlobMeta, &key::blob_meta(hash))? {
            return Err(BlobError::NotFound);
        }

        self.db
            .get(Column::Content, &key::content(hash))?
            .map(|slice| slice.into_vec())
            .ok_or(BlobError::NotFound)
    }

    pub fn descriptor(&self, hash: &[u8; 32]) -> Result<BlobDescriptor, BlobError> {
        let meta = self
            .db
            .get(Column::BlobMeta, &key::blob_meta(hash))?
            .ok_or(BlobError::NotFound)?;

        serde_json::from_slice(&meta).map_err(|e| BlobError::CorruptMeta(e.to_string()))
    }

    /// Every blob uploaded by `uploader`. Walks the metadata column;
    /// blob counts stay small enough on a single node that no secondary
    /// index is kept.
    pub fn list(&self, uploader: &Pubkey) -> Result<Vec<BlobDescriptor>, BlobError> {
        let mut out = Vec::new();

        let mut iter = self.db.iter(Column::BlobMeta)?;
        let mut entry = iter.seek(&[])?;

        while let Some((_key, value)) = entry {
            let descriptor: BlobDescriptor = serde_json::from_slice(&value)
                .map_err(|e| BlobError::CorruptMeta(e.to_string()))?;

            if &descriptor.uploader == uploader {
                out.push(descriptor);
            }

            entry = iter.next()?;
        }

        Ok(out)
    }

    /// Delete a blob; only its uploader may. Content bytes are purged
    /// when no DAG leaf still references them.
    pub fn delete(&self, hash: &[u8; 32], requester: &Pubkey) -> Result<(), BlobError> {
        let _guard = self.write_lock.lock();

        let descriptor = self.descriptor(hash)?;

        if &descriptor.uploader != requester {
            return Err(BlobError::NotUploader);
        }

        let refs = content_refs(&*self.db, hash)?;
        let remaining = refs.saturating_sub(1);

        let mut batch = Batch::new();
        batch.delete(Column::BlobMeta, key::blob_meta(hash));

        if remaining == 0 {
            batch.delete(Column::Content, key::content(hash));
            batch.delete(Column::ContentRefs, key::content(hash));
        } else {
            batch.put(
                Column::ContentRefs,
                key::content(hash),
                remaining.to_be_bytes().to_vec(),
            );
        }

        self.db.apply(batch)?;

        debug!(hash = %descriptor.sha256, remaining_refs = remaining, "deleted blob");

        Ok(())
    }
}

/// Current reference count for a content hash; absent means zero.
pub fn content_refs(db: &dyn Database, hash: &[u8; 32]) -> Result<u64, StoreError> {
    let Some(value) = db.get(Column::ContentRefs, &key::content(hash))? else {
        return Ok(0);
    };

    let bytes: [u8; 8] = value.as_ref().try_into().map_err(|_| StoreError::MalformedKey {
        column: Column::ContentRefs,
    })?;

    Ok(u64::from_be_bytes(bytes))
}

fn detect_mime(bytes: &[u8]) -> &'static str {
    infer::get(bytes).map_or(OCTET_STREAM, |t| t.mime_type())
}

#[cfg(test)]
mod tests {
    use nectar_store::InMemoryDB;

    use super::*;

    const PNG_MAGIC: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
    ];

    fn store() -> BlobStore {
        BlobStore::new(Arc::new(InMemoryDB::new()))
    }

    fn uploader(byte: u8) -> Pubkey {
        Pubkey::from_bytes([byte; 32])
    }

    #[test]
    fn put_is_idempotent_and_get_returns_bytes() {
        let store = store();
        let body = b"some binary payload".to_vec();

        let first = store
            .put(&body, uploader(1), &[], 100)
            .expect("first upload");
        let second = store
            .put(&body, uploader(2), &[], 200)
            .expect("second upload");

        assert_eq!(first, second, "re-upload returns the original descriptor");
        assert_eq!(first.size, body.len() as u64);

        let mut hash = [0_u8; 32];
        hex::decode_to_slice(&first.sha256, &mut hash).expect("hash hex");
        assert_eq!(store.get(&hash).expect("get"), body);
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(matches!(
            store().put(&[], uploader(1), &[], 0),
            Err(BlobError::Empty)
        ));
    }

    #[test]
    fn mime_allow_list_is_enforced() {
        let store = store();
        let allowed = vec!["image/png".to_owned()];

        let ok = store.put(PNG_MAGIC, uploader(1), &allowed, 0).expect("png allowed");
        assert_eq!(ok.mime, "image/png");

        assert!(matches!(
            store.put(b"plain text payload", uploader(1), &allowed, 0),
            Err(BlobError::MimeNotAllowed(_))
        ));
    }

    #[test]
    fn list_filters_by_uploader() {
        let store = store();

        let _a = store.put(b"first blob", uploader(1), &[], 0).expect("put");
        let _b = store.put(b"second blob", uploader(1), &[], 0).expect("put");
        let _c = store.put(b"third blob", uploader(2), &[], 0).expect("put");

        assert_eq!(store.list(&uploader(1)).expect("list").len(), 2);
        assert_eq!(store.list(&uploader(2)).expect("list").len(), 1);
        assert!(store.list(&uploader(3)).expect("list").is_empty());
    }

    #[test]
    fn only_uploader_may_delete() {
        let store = store();
        let body = b"delete me".to_vec();

        let descriptor = store.put(&body, uploader(1), &[], 0).expect("put");
        let mut hash = [0_u8; 32];
        hex::decode_to_slice(&descriptor.sha256, &mut hash).expect("hash hex");

        assert!(matches!(
            store.delete(&hash, &uploader(2)),
            Err(BlobError::NotUploader)
        ));

        store.delete(&hash, &uploader(1)).expect("delete");
        assert!(matches!(store.get(&hash), Err(BlobError::NotFound)));
        assert!(matches!(
            store.delete(&hash, &uploader(1)),
            Err(BlobError::NotFound)
        ));
    }
}
