use std::collections::BTreeMap;

use nectar_primitives::{Pubkey, Sig};
use serde::{Deserialize, Serialize};

use crate::dag::Dag;
use crate::error::{MerkleError, Result};
use crate::leaf::{DagLeaf, LeafType};
use crate::tree::TreeBranch;

/// One unit of a batched DAG transmission. The first packet of a sequence
/// carries the root leaf plus the sender's claim over it; the last sets
/// `final_packet`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransmissionPacket {
    #[serde(rename = "Root")]
    pub root: String,

    #[serde(rename = "Leaf")]
    pub leaf: DagLeaf,

    #[serde(rename = "ParentHash", default, skip_serializing_if = "String::is_empty")]
    pub parent_hash: String,

    #[serde(rename = "Proofs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proofs: BTreeMap<String, TreeBranch>,

    #[serde(rename = "Pubkey", default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<Pubkey>,

    #[serde(rename = "Sig", default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<Sig>,

    #[serde(rename = "Final", default)]
    pub final_packet: bool,
}

impl TransmissionPacket {
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        serde_cbor::to_vec(self).map_err(|e| MerkleError::Serialization(e.to_string()))
    }

    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        serde_cbor::from_slice(data).map_err(|e| MerkleError::Deserialization(e.to_string()))
    }
}

impl Dag {
    /// Transmission sequence in depth-first order: root first, `final`
    /// flag on the last packet, a branch proof accompanying every leaf
    /// whose parent commits to more than one child.
    pub fn to_packets(&self, include_content: bool) -> Result<Vec<TransmissionPacket>> {
        let ordered = self.iter_dfs();

        if ordered.is_empty() {
            return Err(MerkleError::InvalidDag("empty dag".to_owned()));
        }

        let mut packets = Vec::with_capacity(ordered.len());
        let last = ordered.len() - 1;

        for (index, leaf) in ordered.into_iter().enumerate() {
            let mut proofs = BTreeMap::new();

            if !leaf.parent_hash.is_empty() {
                let parent = self
                    .leaves
                    .get(&leaf.parent_hash)
                    .ok_or_else(|| MerkleError::MissingParent(leaf.hash.clone()))?;

                if let Some(branch) = parent.branch_for(&leaf.hash)? {
                    let _prev = proofs.insert(leaf.hash.clone(), branch);
                }
            }

            let mut wire_leaf = if include_content {
                leaf.clone()
            } else {
                leaf.without_content()
            };
            wire_leaf.proofs.clear();

            packets.push(TransmissionPacket {
                root: self.root.clone(),
                leaf: wire_leaf,
                parent_hash: leaf.parent_hash.clone(),
                proofs,
                pubkey: (index == 0).then_some(self.pubkey).flatten(),
                sig: (index == 0).then_some(self.sig).flatten(),
                final_packet: index == last,
            });
        }

        Ok(packets)
    }

    /// Apply one packet to a DAG under reconstruction: recompute the leaf
    /// hash, locate the parent among already-received leaves, verify the
    /// branch, insert. The sequence's first packet establishes the root.
    pub fn apply_and_verify_packet(&mut self, packet: &TransmissionPacket) -> Result<()> {
        let mut leaf = packet.leaf.clone();
        leaf.verify()?;

        if packet.parent_hash.is_empty() {
            if leaf.leaf_type != LeafType::Root {
                return Err(MerkleError::InvalidDag(
                    "first packet does not carry a root leaf".to_owned(),
                ));
            }

            if !self.root.is_empty() && self.root != leaf.hash {
                return Err(MerkleError::InvalidDag(format!(
                    "root {} does not match expected {}",
                    leaf.hash, self.root
                )));
            }

            if packet.root != leaf.hash {
                return Err(MerkleError::InvalidDag(
                    "packet root does not match its root leaf".to_owned(),
                ));
            }

            self.root = leaf.hash.clone();
            self.pubkey = packet.pubkey;
            self.sig = packet.sig;
        } else {
            if packet.root != self.root {
                return Err(MerkleError::InvalidDag(format!(
                    "packet for root {} applied to dag {}",
                    packet.root, self.root
                )));
            }

            let parent = self
                .leaves
                .get(&packet.parent_hash)
                .ok_or_else(|| MerkleError::MissingParent(leaf.hash.clone()))?;

            parent.verify_branch(&leaf.hash, packet.proofs.get(&leaf.hash))?;

            packet.parent_hash.clone_into(&mut leaf.parent_hash);
        }

        let _prev = self.leaves.insert(leaf.hash.clone(), leaf);

        Ok(())
    }
}
