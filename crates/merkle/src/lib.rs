//! Scionic Merkle DAGs: a hybrid of classic merkle trees and merkle DAGs
//! addressing file trees by the signed hash of their root leaf.
//!
//! Parent leaves commit to their labeled children through a classic
//! merkle tree, which keeps partial-DAG branches logarithmic. DAGs move
//! between peers as ordered [`TransmissionPacket`] sequences that are
//! verified leaf by leaf as they arrive.

pub mod dag;
pub mod error;
pub mod leaf;
pub mod packet;
pub mod tree;

pub use dag::{root_digest, Dag, DagBuilder, DEFAULT_CHUNK_SIZE};
pub use error::{MerkleError, Result};
pub use leaf::{DagLeaf, DagLeafBuilder, Label, LeafType};
pub use packet::TransmissionPacket;
pub use tree::{verify_proof, MerkleTree, TreeBranch, TreeProof};
