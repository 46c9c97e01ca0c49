use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use cid::Cid;
use multihash::Multihash;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{MerkleError, Result};
use crate::tree::{verify_proof, MerkleTree, TreeBranch};

const SHA2_256_CODE: u64 = 0x12;
const CBOR_CODEC: u64 = 0x71;

/// Decimal label keying a child in its parent's link map. Labels are
/// assigned in depth-first pre-order during construction, root = 0, and
/// are globally unique within a DAG.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u64);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Label {
    type Err = MerkleError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| MerkleError::InvalidLabel(s.to_owned()))
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Kind of node in the DAG.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafType {
    Root,
    Directory,
    File,
    Chunk,
}

impl fmt::Display for LeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Root => "root",
            Self::Directory => "directory",
            Self::File => "file",
            Self::Chunk => "chunk",
        };
        f.write_str(s)
    }
}

/// One node of a Scionic Merkle DAG.
///
/// The hash commits to the item name, type, link commitment, link count,
/// content hash and (for the root) the total leaf count. `parent_hash` is
/// traversal metadata and deliberately outside the commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagLeaf {
    #[serde(rename = "Hash")]
    pub hash: String,

    #[serde(rename = "ItemName")]
    pub item_name: String,

    #[serde(rename = "Type")]
    pub leaf_type: LeafType,

    /// Empty for the root.
    #[serde(rename = "ParentHash", default, skip_serializing_if = "String::is_empty")]
    pub parent_hash: String,

    /// Child label to child hash; labels unique across the DAG.
    #[serde(rename = "Links", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<Label, String>,

    /// Classic merkle root over the link entries (one entry: that entry's
    /// data; none: absent).
    #[serde(
        rename = "MerkleRoot",
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_bytes_option"
    )]
    pub merkle_root: Option<Vec<u8>>,

    #[serde(
        rename = "ContentHash",
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_bytes_option"
    )]
    pub content_hash: Option<Vec<u8>>,

    #[serde(
        rename = "Content",
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_bytes_option"
    )]
    pub content: Option<Vec<u8>>,

    /// Total leaves in the DAG including the root; root only.
    #[serde(rename = "LeafCount", default, skip_serializing_if = "Option::is_none")]
    pub leaf_count: Option<usize>,

    /// Branches for children whose siblings may be absent; carried on
    /// partials and transmission packets.
    #[serde(rename = "Proofs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proofs: BTreeMap<String, TreeBranch>,
}

mod serde_bytes_option {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(serde_bytes::Bytes::new(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let opt: Option<serde_bytes::ByteBuf> = Option::deserialize(deserializer)?;
        Ok(opt.map(serde_bytes::ByteBuf::into_vec))
    }
}

/// The committed portion of a leaf, hashed into its CID.
#[derive(Serialize)]
struct LeafCommitment<'a> {
    #[serde(rename = "ItemName")]
    item_name: &'a str,
    #[serde(rename = "Type")]
    leaf_type: String,
    #[serde(rename = "MerkleRoot", with = "serde_bytes")]
    merkle_root: &'a [u8],
    #[serde(rename = "CurrentLinkCount")]
    link_count: usize,
    #[serde(rename = "ContentHash")]
    content_hash: Option<&'a serde_bytes::Bytes>,
    #[serde(rename = "LeafCount")]
    leaf_count: Option<usize>,
}

/// Data committed for one link entry in the parent's merkle tree.
#[must_use]
pub fn link_entry_data(label: Label, hash: &str) -> Vec<u8> {
    format!("{label}:{hash}").into_bytes()
}

impl DagLeaf {
    fn commitment_bytes(&self) -> Result<Vec<u8>> {
        let commitment = LeafCommitment {
            item_name: &self.item_name,
            leaf_type: self.leaf_type.to_string(),
            merkle_root: self.merkle_root.as_deref().unwrap_or_default(),
            link_count: self.links.len(),
            content_hash: self
                .content_hash
                .as_deref()
                .map(serde_bytes::Bytes::new),
            leaf_count: self.leaf_count,
        };

        serde_cbor::to_vec(&commitment).map_err(|e| MerkleError::Serialization(e.to_string()))
    }

    /// Recompute this leaf's content-addressing identifier.
    pub fn compute_hash(&self) -> Result<String> {
        let serialized = self.commitment_bytes()?;
        let digest = Sha256::digest(&serialized);

        let mh = Multihash::<64>::wrap(SHA2_256_CODE, &digest)
            .map_err(|e| MerkleError::InvalidCid(e.to_string()))?;

        Ok(Cid::new_v1(CBOR_CODEC, mh).to_string())
    }

    /// Check the declared hash against the recomputed one.
    pub fn verify(&self) -> Result<()> {
        let computed = self.compute_hash()?;

        if computed != self.hash {
            return Err(MerkleError::HashMismatch {
                expected: self.hash.clone(),
                got: computed,
            });
        }

        match (&self.content, &self.content_hash) {
            (Some(content), Some(content_hash)) => {
                let digest = Sha256::digest(content);
                if digest.as_slice() != content_hash.as_slice() {
                    return Err(MerkleError::InvalidLeaf(format!(
                        "content does not match its declared hash in {}",
                        self.hash
                    )));
                }
            }
            (Some(_), None) => {
                return Err(MerkleError::InvalidLeaf(format!(
                    "uncommitted content on leaf {}",
                    self.hash
                )));
            }
            _ => {}
        }

        Ok(())
    }

    /// The canonical serialization a signer commits to; only meaningful on
    /// the root leaf.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        self.commitment_bytes()
    }

    #[must_use]
    pub fn label_of(&self, child_hash: &str) -> Option<Label> {
        self.links
            .iter()
            .find_map(|(label, hash)| (hash == child_hash).then_some(*label))
    }

    #[must_use]
    pub fn has_link(&self, child_hash: &str) -> bool {
        self.label_of(child_hash).is_some()
    }

    fn link_tree(&self) -> Result<MerkleTree> {
        let entries = self
            .links
            .iter()
            .map(|(label, hash)| (hash.clone(), link_entry_data(*label, hash)))
            .collect();

        MerkleTree::new(entries)
    }

    /// Branch authenticating `child_hash` against this leaf's commitment;
    /// `None` when the link list is too small to need one.
    pub fn branch_for(&self, child_hash: &str) -> Result<Option<TreeBranch>> {
        if self.links.len() <= 1 {
            return Ok(None);
        }

        let tree = self.link_tree()?;
        tree.branch(child_hash).map(Some)
    }

    /// Verify that `child_hash` is committed by this leaf, using
    /// `provided` when present and rebuilding the link tree otherwise.
    pub fn verify_branch(&self, child_hash: &str, provided: Option<&TreeBranch>) -> Result<()> {
        let label = self
            .label_of(child_hash)
            .ok_or_else(|| MerkleError::InvalidDag(format!("no link to child {child_hash}")))?;

        let merkle_root = self.merkle_root.as_deref().unwrap_or_default();

        if self.links.len() == 1 {
            let expected = link_entry_data(label, child_hash);
            if merkle_root == expected.as_slice() {
                return Ok(());
            }
            return Err(MerkleError::MerkleRootMismatch);
        }

        if let Some(branch) = provided {
            return verify_proof(&link_entry_data(label, child_hash), &branch.proof, merkle_root);
        }

        let tree = self.link_tree()?;
        if tree.root != merkle_root {
            return Err(MerkleError::MerkleRootMismatch);
        }

        Ok(())
    }

    /// Copy without inline content, for metadata-only transfers.
    #[must_use]
    pub fn without_content(&self) -> Self {
        let mut stripped = self.clone();
        stripped.content = None;
        stripped
    }
}

/// Builder used both by the DAG builder and by tests constructing single
/// leaves.
#[derive(Debug)]
pub struct DagLeafBuilder {
    item_name: String,
    leaf_type: LeafType,
    content: Option<Vec<u8>>,
    links: BTreeMap<Label, String>,
}

impl DagLeafBuilder {
    #[must_use]
    pub fn new(item_name: impl Into<String>, leaf_type: LeafType) -> Self {
        Self {
            item_name: item_name.into(),
            leaf_type,
            content: None,
            links: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    #[must_use]
    pub fn link(mut self, label: Label, hash: impl Into<String>) -> Self {
        let _prev = self.links.insert(label, hash.into());
        self
    }

    /// Finish the leaf; `leaf_count` is only given for the root.
    pub fn build(self, leaf_count: Option<usize>) -> Result<DagLeaf> {
        let merkle_root = match self.links.len() {
            0 => None,
            1 => {
                let (label, hash) = self.links.iter().next().map(|(l, h)| (*l, h.clone())).ok_or_else(
                    || MerkleError::InvalidLeaf("links vanished mid-build".to_owned()),
                )?;
                Some(link_entry_data(label, &hash))
            }
            _ => {
                let entries = self
                    .links
                    .iter()
                    .map(|(label, hash)| (hash.clone(), link_entry_data(*label, hash)))
                    .collect();
                Some(MerkleTree::new(entries)?.root)
            }
        };

        let content_hash = self
            .content
            .as_ref()
            .map(|content| Sha256::digest(content).to_vec());

        let mut leaf = DagLeaf {
            hash: String::new(),
            item_name: self.item_name,
            leaf_type: self.leaf_type,
            parent_hash: String::new(),
            links: self.links,
            merkle_root,
            content_hash,
            content: self.content,
            leaf_count,
            proofs: BTreeMap::new(),
        };

        leaf.hash = leaf.compute_hash()?;
        Ok(leaf)
    }
}
