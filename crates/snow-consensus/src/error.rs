//! Error types for consensus.

use snow_ids::{Id, NodeId};
use thiserror::Error;

use crate::parameters::ParameterError;

/// Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors that can occur during consensus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Parameters violate a quorum or resource bound
    #[error("invalid parameters: {0}")]
    InvalidParameters(#[from] ParameterError),

    /// A zero weight, or a removal larger than the held weight
    #[error("invalid weight")]
    InvalidWeight,

    #[error("validator not found: {0}")]
    ValidatorNotFound(NodeId),

    #[error("validator already present: {0}")]
    DuplicateValidator(NodeId),

    #[error("weight overflow")]
    WeightOverflow,

    /// Sampling from an empty validator set
    #[error("no validators")]
    NoValidators,

    #[error("subnet already registered: {0}")]
    SubnetExists(Id),

    #[error("subnet not found: {0}")]
    SubnetNotFound(Id),

    /// A finalized snowball cell was mutated
    #[error("consensus already finalized")]
    AlreadyFinalized,

    #[error("block already exists: {0}")]
    BlockExists(Id),

    #[error("parent not found: {0}")]
    ParentNotFound(Id),

    #[error("invalid block {id}: {reason}")]
    InvalidBlock { id: Id, reason: String },

    #[error("vertex already exists: {0}")]
    VertexExists(Id),

    #[error("invalid vertex {id}: {reason}")]
    InvalidVertex { id: Id, reason: String },

    /// The DAG has accepted its stop vertex and takes no more vertices
    #[error("consensus is linearized")]
    Linearized,

    /// An item was decided twice
    #[error("{id} already decided")]
    AlreadyDecided { id: Id },

    /// Engine not in correct state
    #[error("invalid engine state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("too many processing items: limit is {limit}")]
    TooManyProcessing { limit: usize },

    #[error("acceptor already registered for chain {chain_id}: {name}")]
    AcceptorExists { chain_id: Id, name: String },

    /// A die-on-error acceptor failed
    #[error("acceptor {name} failed on chain {chain_id}: {reason}")]
    Acceptor {
        chain_id: Id,
        name: String,
        reason: String,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
