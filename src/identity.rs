use {
    crate::ring::{Ring, RingPos},
    serde::{Deserialize, Serialize},
    std::{
        fmt,
        hash::{BuildHasher, Hash, Hasher},
    },
};

/// Identity of a ring member.
///
/// Identity is the node's network address; its ring position is derived from
/// the address once, when the identity is created, and travels with it.
///
/// Two identities are equal if their addresses (host and port) are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    host: String,
    port: u16,
    hash: RingPos,
}

impl NodeIdentity {
    /// Creates an identity, placing the `host:port` address on the ring.
    pub fn new<H: BuildHasher>(host: impl Into<String>, port: u16, ring: &Ring<H>) -> Self {
        let host = host.into();
        let hash = ring.position(format!("{host}:{port}").as_str());
        Self { host, port, hash }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Position of the node on the ring.
    pub fn hash(&self) -> RingPos {
        self.hash
    }

    /// `host:port` address of the node.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PartialEq for NodeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for NodeIdentity {}

impl Hash for NodeIdentity {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.host, self.port, self.hash)
    }
}
