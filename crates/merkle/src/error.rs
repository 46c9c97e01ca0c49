use thiserror::Error;

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },

    #[error("invalid leaf: {0}")]
    InvalidLeaf(String),

    #[error("invalid dag: {0}")]
    InvalidDag(String),

    #[error("missing leaf: {0}")]
    MissingLeaf(String),

    #[error("missing parent for leaf: {0}")]
    MissingParent(String),

    #[error("invalid merkle proof")]
    InvalidProof,

    #[error("merkle root mismatch")]
    MerkleRootMismatch,

    #[error("invalid label: {0}")]
    InvalidLabel(String),

    #[error("invalid cid: {0}")]
    InvalidCid(String),

    #[error("root signature does not verify")]
    BadRootSignature,

    #[error("path not found: {0}")]
    PathNotFound(String),
}

pub type Result<T> = std::result::Result<T, MerkleError>;
