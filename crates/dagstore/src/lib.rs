//! Persistence for Scionic Merkle DAGs: leaf rows keyed per root, shared
//! refcounted content bytes, a label cache materialized at store time,
//! and ownership records claimed by signature over the root.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use nectar_merkle::{root_digest, Dag, DagLeaf, MerkleError};
use nectar_primitives::{unix_now, Pubkey, Sig};
use nectar_store::{key, Batch, Column, Database, StoreError};

#[derive(Debug, Error)]
pub enum DagStoreError {
    #[error("unknown root {0}")]
    UnknownRoot(String),

    #[error("leaf {hash} not stored under root {root}")]
    LeafNotFound { root: String, hash: String },

    #[error("content {0} is not stored")]
    ContentMissing(String),

    #[error("label {label} not cached for root {root}")]
    LabelNotFound { root: String, label: u64 },

    #[error("ownership signature does not verify")]
    BadOwnershipSignature,

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corrupt stored record: {0}")]
    Corrupt(String),
}

/// The single authority over who may manage a root: a claim signed over
/// the root hash. Multiple keys may own the same root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub root: String,
    pub pubkey: Pubkey,
    pub sig: Sig,
    pub acquired_at: u64,
}

#[derive(Clone)]
pub struct DagStore {
    db: Arc<dyn Database>,
    // Serializes content-refcount read-modify-write cycles; shared with
    // the blob store, which writes the same Content/ContentRefs rows.
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for DagStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DagStore")
    }
}

impl DagStore {
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self::with_write_lock(db, Arc::new(Mutex::new(())))
    }

    #[must_use]
    pub fn with_write_lock(db: Arc<dyn Database>, write_lock: Arc<Mutex<()>>) -> Self {
        Self { db, write_lock }
    }

    /// Persist a fully verified DAG in one batch: leaf rows, content
    /// bytes (deduplicated and refcounted), the label cache, and, when
    /// the DAG carries a signed claim, an ownership record. Re-storing a
    /// known root is a no-op.
    pub fn store_dag(&self, dag: &Dag) -> Result<(), DagStoreError> {
        dag.verify()?;

        let _guard = self.write_lock.lock();

        if self.has_root(&dag.root)? {
            return Ok(());
        }

        let mut batch = Batch::new();
        let mut new_refs: HashMap<[u8; 32], u64> = HashMap::new();

        for leaf in dag.leaves.values() {
            self.stage_leaf(&mut batch, &dag.root, leaf, &mut new_refs)?;
        }

        for (label, hash) in dag.labels() {
            batch.put(
                Column::Label,
                key::label(&dag.root, label.0),
                hash.into_bytes(),
            );
        }

        for (hash, added) in new_refs {
            let current = content_refs(&*self.db, &hash)?;
            batch.put(
                Column::ContentRefs,
                key::content(&hash),
                (current + added).to_be_bytes().to_vec(),
            );
        }

        if let (Some(pubkey), Some(sig)) = (dag.pubkey, dag.sig) {
            stage_ownership(&mut batch, &dag.root, pubkey, sig, unix_now())?;
        }

        self.db.apply(batch)?;

        debug!(root = %dag.root, leaves = dag.len(), "persisted dag");
        Ok(())
    }

    /// Persist a single leaf under `root` outside a full-DAG store. The
    /// leaf must individually verify.
    pub fn store_leaf(&self, root: &str, leaf: &DagLeaf) -> Result<(), DagStoreError> {
        leaf.verify()?;

        let _guard = self.write_lock.lock();

        let mut batch = Batch::new();
        let mut new_refs = HashMap::new();

        self.stage_leaf(&mut batch, root, leaf, &mut new_refs)?;

        for (hash, added) in new_refs {
            let current = content_refs(&*self.db, &hash)?;
            batch.put(
                Column::ContentRefs,
                key::content(&hash),
                (current + added).to_be_bytes().to_vec(),
            );
        }

        self.db.apply(batch)?;
        Ok(())
    }

    /// Persist several leaves under `root` in one batch.
    pub fn store_leaves_batch(&self, root: &str, leaves: &[DagLeaf]) -> Result<(), DagStoreError> {
        let _guard = self.write_lock.lock();

        let mut batch = Batch::new();
        let mut new_refs = HashMap::new();

        for leaf in leaves {
            leaf.verify()?;
            self.stage_leaf(&mut batch, root, leaf, &mut new_refs)?;
        }

        for (hash, added) in new_refs {
            let current = content_refs(&*self.db, &hash)?;
            batch.put(
                Column::ContentRefs,
                key::content(&hash),
                (current + added).to_be_bytes().to_vec(),
            );
        }

        self.db.apply(batch)?;
        Ok(())
    }

    fn stage_leaf(
        &self,
        batch: &mut Batch,
        root: &str,
        leaf: &DagLeaf,
        new_refs: &mut HashMap<[u8; 32], u64>,
    ) -> Result<(), DagStoreError> {
        if let Some(content_hash) = &leaf.content_hash {
            let hash: [u8; 32] = content_hash.as_slice().try_into().map_err(|_| {
                DagStoreError::Corrupt(format!("content hash of {} is not 32 bytes", leaf.hash))
            })?;

            match &leaf.content {
                Some(content) => {
                    let already_stored = self.db.has(Column::Content, &key::content(&hash))?;
                    if !already_stored && !new_refs.contains_key(&hash) {
                        batch.put(Column::Content, key::content(&hash), content.clone());
                    }
                }
                None => {
                    let staged = new_refs.contains_key(&hash);
                    if !staged && !self.db.has(Column::Content, &key::content(&hash))? {
                        return Err(DagStoreError::ContentMissing(hex_of(&hash)));
                    }
                }
            }

            *new_refs.entry(hash).or_insert(0) += 1;
        }

        let mut stored = leaf.without_content();
        stored.proofs.clear();

        let bytes =
            serde_cbor::to_vec(&stored).map_err(|e| DagStoreError::Corrupt(e.to_string()))?;
        batch.put(Column::Leaf, key::leaf(root, &leaf.hash), bytes);

        Ok(())
    }

    pub fn has_root(&self, root: &str) -> Result<bool, DagStoreError> {
        Ok(self.db.has(Column::Leaf, &key::leaf(root, root))?)
    }

    pub fn retrieve_leaf(
        &self,
        root: &str,
        hash: &str,
        include_content: bool,
    ) -> Result<DagLeaf, DagStoreError> {
        let bytes = self
            .db
            .get(Column::Leaf, &key::leaf(root, hash))?
            .ok_or_else(|| DagStoreError::LeafNotFound {
                root: root.to_owned(),
                hash: hash.to_owned(),
            })?;

        let mut leaf: DagLeaf =
            serde_cbor::from_slice(&bytes).map_err(|e| DagStoreError::Corrupt(e.to_string()))?;

        if include_content {
            self.attach_content(&mut leaf)?;
        }

        Ok(leaf)
    }

    /// Rebuild the whole DAG for `root`, attaching the first ownership
    /// claim so downloads carry a verifiable signature.
    pub fn build_dag(&self, root: &str, include_content: bool) -> Result<Dag, DagStoreError> {
        let mut leaves = HashMap::new();

        self.stream_leaves(root, include_content, |leaf| {
            let _prev = leaves.insert(leaf.hash.clone(), leaf);
            Ok(())
        })?;

        if leaves.is_empty() {
            return Err(DagStoreError::UnknownRoot(root.to_owned()));
        }

        let mut dag = Dag {
            root: root.to_owned(),
            leaves,
            pubkey: None,
            sig: None,
        };

        if let Some(record) = self.get_ownership(root)?.into_iter().next() {
            dag.pubkey = Some(record.pubkey);
            dag.sig = Some(record.sig);
        }

        Ok(dag)
    }

    /// Structurally partial DAG: the requested leaves plus every ancestor
    /// up to the root, with branch proofs attached to included parents.
    pub fn build_partial_dag(
        &self,
        root: &str,
        hashes: &[String],
        include_content: bool,
    ) -> Result<Dag, DagStoreError> {
        if hashes.is_empty() {
            return Err(DagStoreError::Corrupt("empty hash set requested".to_owned()));
        }

        let mut picked: HashMap<String, DagLeaf> = HashMap::new();
        let root_leaf = self.retrieve_leaf(root, root, include_content)?;
        let _prev = picked.insert(root.to_owned(), root_leaf);

        for hash in hashes {
            let mut current = hash.clone();

            while current != root {
                // Already-picked nodes still get walked through so every
                // requested leaf reaches the root.
                if let Some(leaf) = picked.get(&current) {
                    current = leaf.parent_hash.clone();
                    continue;
                }

                let leaf = self.retrieve_leaf(root, &current, include_content)?;
                let parent_hash = leaf.parent_hash.clone();

                if !picked.contains_key(&parent_hash) {
                    let parent = self.retrieve_leaf(root, &parent_hash, include_content)?;
                    let _prev = picked.insert(parent_hash.clone(), parent);
                }

                let branch = picked
                    .get(&parent_hash)
                    .and_then(|parent| parent.branch_for(&current).transpose())
                    .transpose()?;

                if let Some(branch) = branch {
                    if let Some(parent) = picked.get_mut(&parent_hash) {
                        let _prev = parent.proofs.insert(current.clone(), branch);
                    }
                }

                let _prev = picked.insert(current.clone(), leaf);
                current = parent_hash;
            }
        }

        let mut dag = Dag {
            root: root.to_owned(),
            leaves: picked,
            pubkey: None,
            sig: None,
        };

        if let Some(record) = self.get_ownership(root)?.into_iter().next() {
            dag.pubkey = Some(record.pubkey);
            dag.sig = Some(record.sig);
        }

        Ok(dag)
    }

    /// Label-range partial: `[from..=to]` mapped through the label cache.
    pub fn build_partial_dag_by_range(
        &self,
        root: &str,
        from: u64,
        to: u64,
        include_content: bool,
    ) -> Result<Dag, DagStoreError> {
        let mut hashes = Vec::new();

        for label in from..=to {
            hashes.push(self.label_to_hash(root, label)?);
        }

        self.build_partial_dag(root, &hashes, include_content)
    }

    /// Visit every leaf stored under `root` without materializing a DAG.
    pub fn stream_leaves<F>(
        &self,
        root: &str,
        include_content: bool,
        mut visit: F,
    ) -> Result<(), DagStoreError>
    where
        F: FnMut(DagLeaf) -> Result<(), DagStoreError>,
    {
        for entry in self.db.iter(Column::Leaf)?.prefixed(key::leaf_prefix(root)) {
            let (_key, value) = entry?;

            let mut leaf: DagLeaf = serde_cbor::from_slice(&value)
                .map_err(|e| DagStoreError::Corrupt(e.to_string()))?;

            if include_content {
                self.attach_content(&mut leaf)?;
            }

            visit(leaf)?;
        }

        Ok(())
    }

    /// Point label query against the cache; never walks the DAG.
    pub fn label_to_hash(&self, root: &str, label: u64) -> Result<String, DagStoreError> {
        let bytes = self
            .db
            .get(Column::Label, &key::label(root, label))?
            .ok_or(DagStoreError::LabelNotFound {
                root: root.to_owned(),
                label,
            })?;

        String::from_utf8(bytes.into_vec())
            .map_err(|e| DagStoreError::Corrupt(e.to_string()))
    }

    /// Delete every row belonging to `root`: leaves, labels, ownership.
    /// Content refcounts are decremented and content purged at zero, so
    /// bytes shared with another root (or a blob) survive.
    pub fn delete_dag(&self, root: &str) -> Result<(), DagStoreError> {
        let _guard = self.write_lock.lock();

        let mut batch = Batch::new();
        let mut dropped_refs: HashMap<[u8; 32], u64> = HashMap::new();
        let mut leaf_rows = 0_usize;

        for entry in self.db.iter(Column::Leaf)?.prefixed(key::leaf_prefix(root)) {
            let (row_key, value) = entry?;

            let leaf: DagLeaf = serde_cbor::from_slice(&value)
                .map_err(|e| DagStoreError::Corrupt(e.to_string()))?;

            if let Some(content_hash) = &leaf.content_hash {
                if let Ok(hash) = <[u8; 32]>::try_from(content_hash.as_slice()) {
                    *dropped_refs.entry(hash).or_insert(0) += 1;
                }
            }

            batch.delete(Column::Leaf, row_key.to_vec());
            leaf_rows += 1;
        }

        for entry in self.db.iter(Column::Label)?.prefixed(key::label_prefix(root)) {
            let (row_key, _value) = entry?;
            batch.delete(Column::Label, row_key.to_vec());
        }

        for record in self.get_ownership(root)? {
            batch.delete(Column::Owner, key::owner(root, &record.pubkey));
            batch.delete(Column::OwnerRoots, key::owner_roots(&record.pubkey, root));
        }

        for (hash, dropped) in dropped_refs {
            let current = content_refs(&*self.db, &hash)?;
            let remaining = current.saturating_sub(dropped);

            if remaining == 0 {
                batch.delete(Column::Content, key::content(&hash));
                batch.delete(Column::ContentRefs, key::content(&hash));
            } else {
                batch.put(
                    Column::ContentRefs,
                    key::content(&hash),
                    remaining.to_be_bytes().to_vec(),
                );
            }
        }

        self.db.apply(batch)?;

        debug!(%root, leaves = leaf_rows, "deleted dag");
        Ok(())
    }

    /// Record a claim over `root`; the signature must verify over the
    /// root digest under `pubkey`.
    pub fn claim_ownership(
        &self,
        root: &str,
        pubkey: Pubkey,
        sig: Sig,
    ) -> Result<(), DagStoreError> {
        self.claim_ownership_at(root, pubkey, sig, unix_now())
    }

    pub fn claim_ownership_at(
        &self,
        root: &str,
        pubkey: Pubkey,
        sig: Sig,
        now: u64,
    ) -> Result<(), DagStoreError> {
        if !self.has_root(root)? {
            return Err(DagStoreError::UnknownRoot(root.to_owned()));
        }

        let mut batch = Batch::new();
        stage_ownership(&mut batch, root, pubkey, sig, now)?;
        self.db.apply(batch)?;

        Ok(())
    }

    /// Drop a claim; unknown claims are not an error.
    pub fn release_ownership(&self, root: &str, pubkey: &Pubkey) -> Result<(), DagStoreError> {
        let mut batch = Batch::new();
        batch.delete(Column::Owner, key::owner(root, pubkey));
        batch.delete(Column::OwnerRoots, key::owner_roots(pubkey, root));
        self.db.apply(batch)?;

        Ok(())
    }

    pub fn has_ownership(&self, root: &str) -> Result<bool, DagStoreError> {
        Ok(self
            .db
            .iter(Column::Owner)?
            .prefixed(key::owner_prefix(root))
            .next()
            .transpose()?
            .is_some())
    }

    pub fn get_ownership(&self, root: &str) -> Result<Vec<OwnershipRecord>, DagStoreError> {
        let mut out = Vec::new();

        for entry in self.db.iter(Column::Owner)?.prefixed(key::owner_prefix(root)) {
            let (_key, value) = entry?;

            let record: OwnershipRecord = serde_json::from_slice(&value)
                .map_err(|e| DagStoreError::Corrupt(e.to_string()))?;
            out.push(record);
        }

        Ok(out)
    }

    /// Every root claimed by `pubkey`.
    pub fn roots_owned_by(&self, pubkey: &Pubkey) -> Result<Vec<String>, DagStoreError> {
        let mut out = Vec::new();

        for entry in self
            .db
            .iter(Column::OwnerRoots)?
            .prefixed(key::owner_roots_prefix(pubkey))
        {
            let (row_key, _value) = entry?;
            out.push(key::scoped_suffix(Column::OwnerRoots, &row_key)?);
        }

        Ok(out)
    }

    /// Roots whose stored leaf set contains `leaf_hash`. Walks the leaf
    /// column; acceptable at single-node scale.
    pub fn roots_containing_leaf(&self, leaf_hash: &str) -> Result<Vec<String>, DagStoreError> {
        let mut out = Vec::new();

        let mut iter = self.db.iter(Column::Leaf)?;
        let mut entry = iter.seek(&[])?;

        while let Some((row_key, _value)) = entry {
            let suffix = key::scoped_suffix(Column::Leaf, &row_key)?;

            if suffix == leaf_hash {
                let at = row_key
                    .iter()
                    .position(|&b| b == key::SEP)
                    .unwrap_or(row_key.len());
                let root = String::from_utf8(row_key[..at].to_vec())
                    .map_err(|e| DagStoreError::Corrupt(e.to_string()))?;
                out.push(root);
            }

            entry = iter.next()?;
        }

        Ok(out)
    }

    /// Every stored root hash.
    pub fn list_roots(&self) -> Result<Vec<String>, DagStoreError> {
        let mut out = Vec::new();

        let mut iter = self.db.iter(Column::Leaf)?;
        let mut entry = iter.seek(&[])?;

        while let Some((row_key, _value)) = entry {
            if let Some(at) = row_key.iter().position(|&b| b == key::SEP) {
                let scope = &row_key[..at];
                let suffix = &row_key[at + 1..];

                if scope == suffix {
                    out.push(
                        String::from_utf8(scope.to_vec())
                            .map_err(|e| DagStoreError::Corrupt(e.to_string()))?,
                    );
                }
            }

            entry = iter.next()?;
        }

        Ok(out)
    }

    /// Highest cached label for `root`, if any.
    pub fn max_label(&self, root: &str) -> Result<Option<u64>, DagStoreError> {
        let mut max = None;

        for entry in self.db.iter(Column::Label)?.prefixed(key::label_prefix(root)) {
            let (row_key, _value) = entry?;
            max = Some(key::label_suffix(Column::Label, &row_key)?);
        }

        Ok(max)
    }

    fn attach_content(&self, leaf: &mut DagLeaf) -> Result<(), DagStoreError> {
        let Some(content_hash) = &leaf.content_hash else {
            return Ok(());
        };

        let hash: [u8; 32] = content_hash.as_slice().try_into().map_err(|_| {
            DagStoreError::Corrupt(format!("content hash of {} is not 32 bytes", leaf.hash))
        })?;

        let bytes = self
            .db
            .get(Column::Content, &key::content(&hash))?
            .ok_or_else(|| DagStoreError::ContentMissing(hex_of(&hash)))?;

        leaf.content = Some(bytes.into_vec());
        Ok(())
    }
}

fn stage_ownership(
    batch: &mut Batch,
    root: &str,
    pubkey: Pubkey,
    sig: Sig,
    now: u64,
) -> Result<(), DagStoreError> {
    nectar_crypto::verify(&pubkey, &root_digest(root), &sig)
        .map_err(|_| DagStoreError::BadOwnershipSignature)?;

    let record = OwnershipRecord {
        root: root.to_owned(),
        pubkey,
        sig,
        acquired_at: now,
    };

    let bytes = serde_json::to_vec(&record).map_err(|e| DagStoreError::Corrupt(e.to_string()))?;

    batch.put(Column::Owner, key::owner(root, &pubkey), bytes);
    batch.put(Column::OwnerRoots, key::owner_roots(&pubkey, root), Vec::new());

    Ok(())
}

fn content_refs(db: &dyn Database, hash: &[u8; 32]) -> Result<u64, StoreError> {
    let Some(value) = db.get(Column::ContentRefs, &key::content(hash))? else {
        return Ok(0);
    };

    let bytes: [u8; 8] = value
        .as_ref()
        .try_into()
        .map_err(|_| StoreError::MalformedKey {
            column: Column::ContentRefs,
        })?;

    Ok(u64::from_be_bytes(bytes))
}

fn hex_of(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}
