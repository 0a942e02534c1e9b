use {
    crate::{RingResult, identity::NodeIdentity, ring::RingPos},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Client operation on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Store the value, replacing any existing one.
    Put,
    /// Concatenate the value onto the existing one.
    ///
    /// Not idempotent: a call that is retried after the node waited for the
    /// ring to stabilize may apply twice.
    Append,
    /// Read the value.
    Get,
    /// Remove the key.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Put => "PUT",
            Operation::Append => "APPEND",
            Operation::Get => "GET",
            Operation::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Kind of membership update broadcast to ring members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipChange {
    Join,
    Leave,
}

/// Introducer's answer to a join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Members of the ring as known by the introducer before the join,
    /// introducer included.
    pub membership: Vec<NodeIdentity>,

    /// Predecessor of the joining node.
    pub predecessor: Option<NodeIdentity>,
}

/// Operations a ring node exposes to its peers.
///
/// Implemented by the node itself (inbound side) and by transport proxies
/// (outbound side), so a call on a proxy runs the same operation on the
/// remote node. Proxies surface transport failures as
/// [`RingError::RemoteCallFailure`](crate::RingError::RemoteCallFailure).
#[async_trait::async_trait]
pub trait RingService: Send + Sync {
    /// Executes a client operation, forwarding it to the owner if needed.
    async fn exec(
        &self,
        key: String,
        value: Option<String>,
        op: Operation,
    ) -> RingResult<Option<String>>;

    /// Resolves the member owning the given ring position, following the
    /// ring until a node claims it.
    async fn get_successor(&self, hash: RingPos) -> RingResult<NodeIdentity>;

    /// Predecessor of the member owning the given ring position.
    async fn get_predecessor_of(&self, hash: RingPos) -> RingResult<Option<NodeIdentity>>;

    /// Handles a join request of a new node (introducer side).
    async fn join_ring(&self, joining: NodeIdentity) -> RingResult<JoinResponse>;

    /// Notification from the predecessor that it is leaving the ring.
    async fn leave_ring(
        &self,
        leaving: NodeIdentity,
        predecessor: Option<NodeIdentity>,
    ) -> RingResult<()>;

    /// Points the predecessor at the given node, returning the previous one.
    async fn change_predecessor(
        &self,
        predecessor: NodeIdentity,
    ) -> RingResult<Option<NodeIdentity>>;

    /// Applies a membership change broadcast by a peer.
    async fn update_membership(
        &self,
        change: MembershipChange,
        identity: NodeIdentity,
    ) -> RingResult<()>;

    /// Hands over every stored pair this node no longer owns.
    ///
    /// The returned pairs are deleted locally.
    async fn remote_snapshot(&self) -> RingResult<Vec<(String, String)>>;

    async fn predecessor(&self) -> RingResult<Option<NodeIdentity>>;

    async fn successor(&self) -> RingResult<Option<NodeIdentity>>;

    async fn membership(&self) -> RingResult<Vec<NodeIdentity>>;
}
