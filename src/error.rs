use {
    crate::{
        service::Operation,
        state::Phase,
        storage::StorageError,
        transport::TransportError,
    },
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RingError {
    /// The node did not become stable within the allowed number of polls.
    #[error("Node did not stabilize after {polls} polls")]
    ClusterJoinTimeout { polls: u32 },

    /// Operation was issued against a node that is not running.
    #[error("Node is not running")]
    NodeUnavailable,

    /// Membership lookup could not resolve an owner for the position.
    ///
    /// This is a violation of the ring's ownership invariant and is never
    /// treated as success.
    #[error("No owner resolved for ring position {hash}")]
    RoutingLookupFailure { hash: u64 },

    /// Contacting a peer failed (transport error or timeout).
    #[error("Remote call to {peer} failed: {reason}")]
    RemoteCallFailure { peer: String, reason: String },

    /// A joining node hashes onto a position already taken by a member.
    #[error("Ring position {hash} is already taken by {existing}")]
    IdentityConflict { hash: u64, existing: String },

    /// Offered predecessor does not lie between the current predecessor and
    /// the node.
    ///
    /// The caller placed the new node against a stale view of the ring and
    /// has to resolve its successor again.
    #[error("{candidate} does not fall between predecessor {predecessor} and the node")]
    PredecessorMismatch { candidate: String, predecessor: String },

    /// A write operation was issued without a value.
    #[error("{op} requires a value")]
    MissingValue { op: Operation },

    /// Lifecycle call not allowed in the node's current phase.
    #[error("Operation not allowed while node is {phase:?}")]
    InvalidPhase { phase: Phase },

    /// Local storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid node configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<StorageError> for RingError {
    fn from(err: StorageError) -> Self {
        RingError::Storage(err.to_string())
    }
}

impl From<TransportError> for RingError {
    fn from(err: TransportError) -> Self {
        RingError::RemoteCallFailure {
            peer: err.peer().to_string(),
            reason: err.to_string(),
        }
    }
}

pub type RingResult<T> = Result<T, RingError>;
