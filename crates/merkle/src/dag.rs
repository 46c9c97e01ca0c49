use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use nectar_primitives::{Pubkey, Sig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MerkleError, Result};
use crate::leaf::{DagLeaf, DagLeafBuilder, Label, LeafType};

/// Default file chunking threshold.
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// The 32-byte digest a root signature commits to.
#[must_use]
pub fn root_digest(root_hash: &str) -> [u8; 32] {
    Sha256::digest(root_hash.as_bytes()).into()
}

/// A connected set of leaves keyed by hash with a distinguished root.
/// `pubkey`/`sig` carry the uploader's claim over the root when known.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dag {
    #[serde(rename = "Root")]
    pub root: String,

    #[serde(rename = "Leafs")]
    pub leaves: HashMap<String, DagLeaf>,

    #[serde(rename = "Pubkey", default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<Pubkey>,

    #[serde(rename = "Sig", default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<Sig>,
}

/// Builds DAGs from in-memory bytes or filesystem trees, chunking files
/// larger than the configured chunk size.
#[derive(Copy, Clone, Debug)]
pub struct DagBuilder {
    chunk_size: usize,
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

struct BuildNode {
    name: String,
    leaf_type: LeafType,
    content: Option<Vec<u8>>,
    children: Vec<BuildNode>,
    label: Label,
}

impl DagBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// DAG for a single named blob of bytes.
    pub fn from_bytes(&self, name: impl Into<String>, data: Vec<u8>) -> Result<Dag> {
        let name = name.into();
        let file = self.file_node(name.clone(), data);

        let root = BuildNode {
            name,
            leaf_type: LeafType::Root,
            content: None,
            children: vec![file],
            label: Label(0),
        };

        finish(root)
    }

    /// DAG for a file or directory on disk.
    pub fn from_path(&self, path: impl AsRef<Path>) -> Result<Dag> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(MerkleError::PathNotFound(path.display().to_string()));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("root")
            .to_owned();

        let children = if path.is_dir() {
            self.dir_children(path)?
        } else {
            vec![self.file_node(name.clone(), fs::read(path)?)]
        };

        let root = BuildNode {
            name,
            leaf_type: LeafType::Root,
            content: None,
            children,
            label: Label(0),
        };

        finish(root)
    }

    fn dir_children(&self, dir: &Path) -> Result<Vec<BuildNode>> {
        let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;

        // Deterministic ordering regardless of filesystem.
        entries.sort_by_key(std::fs::DirEntry::file_name);

        let mut children = Vec::with_capacity(entries.len());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if path.is_dir() {
                children.push(BuildNode {
                    name,
                    leaf_type: LeafType::Directory,
                    content: None,
                    children: self.dir_children(&path)?,
                    label: Label(0),
                });
            } else {
                children.push(self.file_node(name, fs::read(&path)?));
            }
        }

        Ok(children)
    }

    fn file_node(&self, name: String, data: Vec<u8>) -> BuildNode {
        if self.chunk_size > 0 && data.len() > self.chunk_size {
            let children = data
                .chunks(self.chunk_size)
                .enumerate()
                .map(|(i, chunk)| BuildNode {
                    name: format!("{name}/{i}"),
                    leaf_type: LeafType::Chunk,
                    content: Some(chunk.to_vec()),
                    children: vec![],
                    label: Label(0),
                })
                .collect();

            BuildNode {
                name,
                leaf_type: LeafType::File,
                content: None,
                children,
                label: Label(0),
            }
        } else {
            BuildNode {
                name,
                leaf_type: LeafType::File,
                content: Some(data),
                children: vec![],
                label: Label(0),
            }
        }
    }
}

fn finish(mut root: BuildNode) -> Result<Dag> {
    let mut counter = 1_u64;
    assign_labels(&mut root, &mut counter);

    let total = count_nodes(&root);
    let mut leaves = HashMap::with_capacity(total);
    let root_hash = build_into(root, &mut leaves, true, total)?;

    Ok(Dag {
        root: root_hash,
        leaves,
        pubkey: None,
        sig: None,
    })
}

fn assign_labels(node: &mut BuildNode, counter: &mut u64) {
    for child in &mut node.children {
        child.label = Label(*counter);
        *counter += 1;
        assign_labels(child, counter);
    }
}

fn count_nodes(node: &BuildNode) -> usize {
    1 + node.children.iter().map(count_nodes).sum::<usize>()
}

fn build_into(
    node: BuildNode,
    leaves: &mut HashMap<String, DagLeaf>,
    is_root: bool,
    total: usize,
) -> Result<String> {
    let mut built = Vec::with_capacity(node.children.len());

    for child in node.children {
        let label = child.label;
        let hash = build_into(child, leaves, false, total)?;
        built.push((label, hash));
    }

    let mut builder = DagLeafBuilder::new(node.name, node.leaf_type);

    if let Some(content) = node.content {
        builder = builder.content(content);
    }

    for (label, hash) in &built {
        builder = builder.link(*label, hash.clone());
    }

    let leaf = builder.build(is_root.then_some(total))?;

    for (_, child_hash) in &built {
        if let Some(child) = leaves.get_mut(child_hash) {
            leaf.hash.clone_into(&mut child.parent_hash);
        }
    }

    let hash = leaf.hash.clone();
    let _prev = leaves.insert(hash.clone(), leaf);

    Ok(hash)
}

impl Dag {
    /// Empty DAG used on the receiving side of a transmission.
    #[must_use]
    pub fn receiver() -> Self {
        Self {
            root: String::new(),
            leaves: HashMap::new(),
            pubkey: None,
            sig: None,
        }
    }

    pub fn root_leaf(&self) -> Result<&DagLeaf> {
        self.leaves
            .get(&self.root)
            .ok_or_else(|| MerkleError::MissingLeaf("root leaf not present".to_owned()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Whether some leaves the root declares are absent.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.leaves.get(&self.root).map_or(true, |root| {
            root.leaf_count
                .map_or(true, |count| self.leaves.len() < count)
        })
    }

    /// Verify the whole structure: every leaf hash, every parent branch,
    /// the root commitment and, when a claim is attached, the root
    /// signature. Full DAGs additionally check link closure and the
    /// declared leaf count.
    pub fn verify(&self) -> Result<()> {
        let root = self.root_leaf()?;

        if root.leaf_type != LeafType::Root {
            return Err(MerkleError::InvalidDag(
                "root leaf is not of root type".to_owned(),
            ));
        }

        root.verify()?;

        if let (Some(pubkey), Some(sig)) = (&self.pubkey, &self.sig) {
            nectar_crypto::verify(pubkey, &root_digest(&self.root), sig)
                .map_err(|_| MerkleError::BadRootSignature)?;
        }

        for (hash, leaf) in &self.leaves {
            if hash == &self.root {
                continue;
            }

            leaf.verify()?;

            let parent = self
                .leaves
                .get(&leaf.parent_hash)
                .ok_or_else(|| MerkleError::MissingParent(hash.clone()))?;

            parent.verify_branch(hash, parent.proofs.get(hash))?;
        }

        if !self.is_partial() {
            for leaf in self.leaves.values() {
                for child_hash in leaf.links.values() {
                    let child = self
                        .leaves
                        .get(child_hash)
                        .ok_or_else(|| MerkleError::MissingLeaf(child_hash.clone()))?;

                    if child.parent_hash != leaf.hash {
                        return Err(MerkleError::InvalidDag(format!(
                            "child {child_hash} does not point back at {}",
                            leaf.hash
                        )));
                    }
                }
            }

            if let Some(count) = root.leaf_count {
                if count != self.leaves.len() {
                    return Err(MerkleError::InvalidDag(format!(
                        "root declares {count} leaves, found {}",
                        self.leaves.len()
                    )));
                }
            }
        }

        Ok(())
    }

    /// All labels present in this DAG, root included as label 0.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<Label, String> {
        let mut labels = BTreeMap::new();
        let _prev = labels.insert(Label(0), self.root.clone());

        for leaf in self.leaves.values() {
            for (label, hash) in &leaf.links {
                let _prev = labels.insert(*label, hash.clone());
            }
        }

        labels
    }

    #[must_use]
    pub fn label_of(&self, hash: &str) -> Option<Label> {
        if hash == self.root {
            return Some(Label(0));
        }

        self.leaves
            .values()
            .find_map(|leaf| leaf.label_of(hash))
    }

    pub fn hashes_by_label_range(&self, from: u64, to: u64) -> Result<Vec<String>> {
        if from < 1 {
            return Err(MerkleError::InvalidLabel(
                "range starts below 1 (0 is the root)".to_owned(),
            ));
        }

        if to < from {
            return Err(MerkleError::InvalidLabel(format!(
                "range end {to} below start {from}"
            )));
        }

        let labels = self.labels();
        let hashes: Vec<String> = labels
            .range(Label(from)..=Label(to))
            .map(|(_, hash)| hash.clone())
            .collect();

        if hashes.is_empty() {
            return Err(MerkleError::InvalidLabel(format!(
                "no labels in range {from}..={to}"
            )));
        }

        Ok(hashes)
    }

    /// Leaves in depth-first pre-order, children visited in label order.
    #[must_use]
    pub fn iter_dfs(&self) -> Vec<&DagLeaf> {
        let mut out = Vec::with_capacity(self.leaves.len());

        let Some(root) = self.leaves.get(&self.root) else {
            return out;
        };

        let mut stack = vec![root];

        while let Some(leaf) = stack.pop() {
            out.push(leaf);

            // Reverse label order so the stack pops smallest first.
            for hash in leaf.links.values().rev() {
                if let Some(child) = self.leaves.get(hash) {
                    stack.push(child);
                }
            }
        }

        out
    }

    /// Structurally partial DAG holding `hashes` plus every ancestor up to
    /// the root, with branch proofs attached to each included parent.
    pub fn get_partial(&self, hashes: &[String]) -> Result<Self> {
        if hashes.is_empty() {
            return Err(MerkleError::InvalidDag("no leaf hashes requested".to_owned()));
        }

        let mut picked: HashMap<String, DagLeaf> = HashMap::new();

        let root = self.root_leaf()?;
        let _prev = picked.insert(self.root.clone(), root.clone());

        for hash in hashes {
            let mut current = hash.clone();

            while current != self.root {
                let leaf = self
                    .leaves
                    .get(&current)
                    .ok_or_else(|| MerkleError::MissingLeaf(current.clone()))?;

                let parent_hash = leaf.parent_hash.clone();

                if picked.insert(current.clone(), leaf.clone()).is_none() {
                    let parent = self
                        .leaves
                        .get(&parent_hash)
                        .ok_or_else(|| MerkleError::MissingParent(current.clone()))?;

                    if let Some(branch) = parent.branch_for(&current)? {
                        let entry = picked
                            .entry(parent_hash.clone())
                            .or_insert_with(|| parent.clone());
                        let _prev = entry.proofs.insert(current.clone(), branch);
                    }
                }

                current = parent_hash;
            }
        }

        Ok(Self {
            root: self.root.clone(),
            leaves: picked,
            pubkey: self.pubkey,
            sig: self.sig,
        })
    }

    /// Reassemble a file leaf's content, following chunk links in label
    /// order.
    pub fn content_of(&self, hash: &str) -> Result<Vec<u8>> {
        let leaf = self
            .leaves
            .get(hash)
            .ok_or_else(|| MerkleError::MissingLeaf(hash.to_owned()))?;

        if leaf.links.is_empty() {
            return Ok(leaf.content.clone().unwrap_or_default());
        }

        let mut out = Vec::new();

        for child_hash in leaf.links.values() {
            let chunk = self
                .leaves
                .get(child_hash)
                .ok_or_else(|| MerkleError::MissingLeaf(child_hash.clone()))?;

            match &chunk.content {
                Some(content) => out.extend_from_slice(content),
                None => {
                    return Err(MerkleError::InvalidLeaf(format!(
                        "chunk {child_hash} has no content"
                    )))
                }
            }
        }

        Ok(out)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        serde_cbor::to_vec(self).map_err(|e| MerkleError::Serialization(e.to_string()))
    }

    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        serde_cbor::from_slice(data).map_err(|e| MerkleError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_file_dag_has_root_and_file_leaf() {
        let dag = DagBuilder::new()
            .from_bytes("note.txt", b"tiny".to_vec())
            .expect("build dag");

        assert_eq!(dag.len(), 2);
        dag.verify().expect("verifies");

        let root = dag.root_leaf().expect("root");
        assert_eq!(root.leaf_type, LeafType::Root);
        assert_eq!(root.leaf_count, Some(2));
    }

    #[test]
    fn chunked_file_dag_shape() {
        // 10 KiB at 4 KiB chunks: 3 chunks + 1 file leaf + 1 root.
        let data = vec![0xAB_u8; 10 * 1024];
        let dag = DagBuilder::new()
            .chunk_size(4 * 1024)
            .from_bytes("big.bin", data.clone())
            .expect("build dag");

        assert_eq!(dag.len(), 5);
        dag.verify().expect("verifies");

        let root = dag.root_leaf().expect("root");
        assert_eq!(root.links.len(), 1);

        let file_hash = root.links.values().next().expect("file link");
        assert_eq!(dag.content_of(file_hash).expect("reassemble"), data);
    }

    #[test]
    fn labels_are_dense_dfs_preorder() {
        let data = vec![1_u8; 9 * 1024];
        let dag = DagBuilder::new()
            .chunk_size(4 * 1024)
            .from_bytes("big.bin", data)
            .expect("build dag");

        let labels = dag.labels();
        let expected: Vec<u64> = (0..=4).collect();
        let got: Vec<u64> = labels.keys().map(|l| l.0).collect();
        assert_eq!(got, expected);

        assert_eq!(labels.get(&Label(0)), Some(&dag.root));
        assert_eq!(dag.label_of(&dag.root), Some(Label(0)));
    }

    #[test]
    fn partial_contains_requested_plus_ancestors_and_verifies() {
        let data = vec![7_u8; 12 * 1024];
        let dag = DagBuilder::new()
            .chunk_size(4 * 1024)
            .from_bytes("big.bin", data)
            .expect("build dag");

        let chunk_hashes = dag.hashes_by_label_range(2, 3).expect("range");
        let partial = dag.get_partial(&chunk_hashes).expect("partial");

        // 2 chunks + file leaf + root.
        assert_eq!(partial.len(), 4);
        assert!(partial.is_partial());
        partial.verify().expect("partial verifies");
    }

    #[test]
    fn bad_range_is_rejected() {
        let dag = DagBuilder::new()
            .from_bytes("note.txt", b"tiny".to_vec())
            .expect("build dag");

        assert!(dag.hashes_by_label_range(0, 1).is_err());
        assert!(dag.hashes_by_label_range(3, 2).is_err());
        assert!(dag.hashes_by_label_range(5, 9).is_err());
    }

    #[test]
    fn directory_dag_roundtrips_through_cbor() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"alpha").expect("write");
        std::fs::write(dir.path().join("b.txt"), b"beta").expect("write");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub/c.txt"), b"gamma").expect("write");

        let dag = DagBuilder::new().from_path(dir.path()).expect("build dag");
        dag.verify().expect("verifies");
        assert_eq!(dag.len(), 5);

        let bytes = dag.to_cbor().expect("serialize");
        let back = Dag::from_cbor(&bytes).expect("deserialize");

        assert_eq!(back.root, dag.root);
        assert_eq!(back.len(), dag.len());
        back.verify().expect("roundtrip verifies");
    }

    #[test]
    fn tampering_any_leaf_breaks_verification() {
        let mut dag = DagBuilder::new()
            .chunk_size(4)
            .from_bytes("x.bin", b"0123456789".to_vec())
            .expect("build dag");

        let victim = dag
            .leaves
            .values()
            .find(|l| l.leaf_type == LeafType::Chunk)
            .expect("chunk leaf")
            .hash
            .clone();

        if let Some(leaf) = dag.leaves.get_mut(&victim) {
            leaf.content = Some(b"EVIL".to_vec());
        }

        assert!(dag.verify().is_err());
    }
}
