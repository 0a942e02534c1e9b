//! A node of a Chord-style distributed hash table.
//!
//! Nodes are placed on a ring of `2^bits` positions by hashing their
//! `host:port` address. Keys are placed the same way, and each key is owned
//! by exactly one node: the first node clockwise at or after the key's
//! position. A node owns the interval `(predecessor, self]`.
//!
//! Every node keeps a flat list of the other members, so a client operation
//! sent to any node reaches the owner of its key in at most one forward.
//! Nodes join through an existing member (the introducer), which places the
//! new node on the ring, announces it to everyone it knows and moves the pairs
//! the new node now owns. A leaving node announces its departure; the pairs
//! it stored are not handed over.
//!
//! ```no_run
//! use ringdht::{NodeBuilder, NodeConfig};
//!
//! # async fn run() -> ringdht::RingResult<()> {
//! let first = NodeBuilder::new(NodeConfig::new("127.0.0.1", 7000, 32)).build()?;
//! first.start().await?;
//!
//! let config = NodeConfig::new("127.0.0.1", 7001, 32).with_introducer("127.0.0.1", 7000);
//! let second = NodeBuilder::new(config).build()?;
//! second.start().await?;
//!
//! first.put("greeting", "hello").await?;
//! assert_eq!(second.get("greeting").await?, Some("hello".to_string()));
//!
//! second.leave().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod config;
mod error;
mod hash;
mod identity;
mod membership;
mod node;
mod rebalance;
mod ring;
mod service;
mod state;
mod storage;
pub mod testing;
pub mod transport;

pub use {
    builder::NodeBuilder,
    config::NodeConfig,
    error::{RingError, RingResult},
    hash::{DefaultHasher, RingHasher},
    identity::NodeIdentity,
    membership::{MembershipError, RingMembership},
    node::RingNode,
    ring::{MAX_RING_BITS, OwnedRange, Ring, RingPos},
    service::{JoinResponse, MembershipChange, Operation, RingService},
    state::{NodeState, Phase},
    storage::{MemoryStorage, StorageError, StorageService},
};
