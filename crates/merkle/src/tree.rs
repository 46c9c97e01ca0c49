use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MerkleError, Result};

/// Inclusion proof for one entry of a classic merkle tree: sibling hashes
/// along the path to the root plus a bitmap giving each sibling's side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeProof {
    #[serde(rename = "Siblings")]
    pub siblings: Vec<serde_bytes::ByteBuf>,

    /// Bit `d` set means our node sits left of its sibling at depth `d`.
    #[serde(rename = "Path")]
    pub path: u32,
}

/// A proof bound to the child it authenticates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeBranch {
    #[serde(rename = "Leaf")]
    pub leaf: String,

    #[serde(rename = "Proof")]
    pub proof: TreeProof,
}

/// Classic merkle tree over a parent leaf's link entries.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    pub root: Vec<u8>,
    pub proofs: Vec<TreeProof>,
    key_to_index: HashMap<String, usize>,
}

impl MerkleTree {
    pub fn new(entries: Vec<(String, Vec<u8>)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(MerkleError::InvalidLeaf(
                "cannot build a tree with no entries".to_owned(),
            ));
        }

        let mut key_to_index = HashMap::new();
        let mut leaves = Vec::with_capacity(entries.len());

        for (index, (key, data)) in entries.into_iter().enumerate() {
            leaves.push(Sha256::digest(&data).to_vec());
            let _prev = key_to_index.insert(key, index);
        }

        let (root, proofs) = build_levels(&leaves);

        Ok(Self {
            root,
            proofs,
            key_to_index,
        })
    }

    #[must_use]
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.key_to_index.get(key).copied()
    }

    pub fn branch(&self, key: &str) -> Result<TreeBranch> {
        let index = self
            .index_of(key)
            .ok_or_else(|| MerkleError::InvalidLeaf(format!("key not in tree: {key}")))?;

        Ok(TreeBranch {
            leaf: key.to_owned(),
            proof: self.proofs[index].clone(),
        })
    }
}

fn build_levels(leaves: &[Vec<u8>]) -> (Vec<u8>, Vec<TreeProof>) {
    if leaves.len() == 1 {
        let proof = TreeProof {
            siblings: vec![],
            path: 0,
        };
        return (leaves[0].clone(), vec![proof]);
    }

    let mut current = leaves.to_vec();
    let mut levels = vec![current.clone()];

    while current.len() > 1 {
        let mut next = Vec::with_capacity(current.len().div_ceil(2));

        for pair in current.chunks(2) {
            let hash = if pair.len() == 2 {
                hash_pair(&pair[0], &pair[1])
            } else {
                // Odd node promotes unchanged.
                pair[0].clone()
            };
            next.push(hash);
        }

        current = next;
        levels.push(current.clone());
    }

    let root = current[0].clone();
    let proofs = (0..leaves.len()).map(|i| prove(i, &levels)).collect();

    (root, proofs)
}

fn prove(leaf_index: usize, levels: &[Vec<Vec<u8>>]) -> TreeProof {
    let mut siblings = Vec::new();
    let mut path: u32 = 0;
    let mut index = leaf_index;

    for (depth, level) in levels.iter().take(levels.len() - 1).enumerate() {
        let is_right = index % 2 == 1;

        if !is_right {
            path |= 1 << depth;
        }

        let sibling = if is_right { index - 1 } else { index + 1 };
        if sibling < level.len() {
            siblings.push(serde_bytes::ByteBuf::from(level[sibling].clone()));
        }

        index /= 2;
    }

    TreeProof { siblings, path }
}

fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

/// Verify a proof for `data` against `root`.
pub fn verify_proof(data: &[u8], proof: &TreeProof, root: &[u8]) -> Result<()> {
    let mut current = Sha256::digest(data).to_vec();

    for (depth, sibling) in proof.siblings.iter().enumerate() {
        let we_are_left = (proof.path & (1 << depth)) != 0;

        current = if we_are_left {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
    }

    if current == root {
        Ok(())
    } else {
        Err(MerkleError::InvalidProof)
    }
}
