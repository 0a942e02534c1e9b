use {
    super::{ServerHandle, Transport, TransportError},
    crate::{
        RingResult,
        identity::NodeIdentity,
        ring::RingPos,
        service::{JoinResponse, MembershipChange, Operation, RingService},
    },
    parking_lot::RwLock,
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
    tokio::sync::oneshot,
    tracing::debug,
};

/// In-process transport.
///
/// Nodes served on the same `LocalNetwork` call each other directly, without
/// serialization. Peers can be cut off with [`disconnect`](Self::disconnect)
/// to make every call to them fail as if the network was down.
///
/// The network is a cheap handle: clones share the same registry.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    services: RwLock<HashMap<String, Arc<dyn RingService>>>,
    disconnected: RwLock<HashSet<String>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `peer` fail until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self, peer: &NodeIdentity) {
        self.inner.disconnected.write().insert(peer.addr());
    }

    pub fn reconnect(&self, peer: &NodeIdentity) {
        self.inner.disconnected.write().remove(&peer.addr());
    }

    /// Whether a node is currently served at the address of `peer`.
    pub fn is_served(&self, peer: &NodeIdentity) -> bool {
        self.inner.services.read().contains_key(&peer.addr())
    }

    fn lookup(&self, addr: &str) -> Result<Arc<dyn RingService>, TransportError> {
        let unreachable = || TransportError::Unreachable {
            peer: addr.to_string(),
        };
        if self.inner.disconnected.read().contains(addr) {
            return Err(unreachable());
        }
        self.inner
            .services
            .read()
            .get(addr)
            .cloned()
            .ok_or_else(unreachable)
    }
}

#[async_trait::async_trait]
impl Transport for LocalNetwork {
    async fn serve(
        &self,
        identity: &NodeIdentity,
        service: Arc<dyn RingService>,
    ) -> Result<ServerHandle, TransportError> {
        let addr = identity.addr();
        {
            let mut services = self.inner.services.write();
            if services.contains_key(&addr) {
                return Err(TransportError::AlreadyServed { addr });
            }
            services.insert(addr.clone(), service);
        }
        debug!(%addr, "serving on local network");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let network = self.clone();
        let served = addr.clone();
        let task = tokio::spawn(async move {
            let _ = shutdown_rx.await;
            network.inner.services.write().remove(&served);
            debug!(addr = %served, "stopped serving on local network");
        });
        Ok(ServerHandle::new(addr, shutdown_tx, task))
    }

    fn connect(&self, peer: &NodeIdentity) -> Arc<dyn RingService> {
        Arc::new(LocalPeer {
            network: self.clone(),
            addr: peer.addr(),
        })
    }
}

/// Proxy resolving the target node on every call.
struct LocalPeer {
    network: LocalNetwork,
    addr: String,
}

impl LocalPeer {
    fn target(&self) -> Result<Arc<dyn RingService>, TransportError> {
        self.network.lookup(&self.addr)
    }
}

#[async_trait::async_trait]
impl RingService for LocalPeer {
    async fn exec(
        &self,
        key: String,
        value: Option<String>,
        op: Operation,
    ) -> RingResult<Option<String>> {
        self.target()?.exec(key, value, op).await
    }

    async fn get_successor(&self, hash: RingPos) -> RingResult<NodeIdentity> {
        self.target()?.get_successor(hash).await
    }

    async fn get_predecessor_of(&self, hash: RingPos) -> RingResult<Option<NodeIdentity>> {
        self.target()?.get_predecessor_of(hash).await
    }

    async fn join_ring(&self, joining: NodeIdentity) -> RingResult<JoinResponse> {
        self.target()?.join_ring(joining).await
    }

    async fn leave_ring(
        &self,
        leaving: NodeIdentity,
        predecessor: Option<NodeIdentity>,
    ) -> RingResult<()> {
        self.target()?.leave_ring(leaving, predecessor).await
    }

    async fn change_predecessor(
        &self,
        predecessor: NodeIdentity,
    ) -> RingResult<Option<NodeIdentity>> {
        self.target()?.change_predecessor(predecessor).await
    }

    async fn update_membership(
        &self,
        change: MembershipChange,
        identity: NodeIdentity,
    ) -> RingResult<()> {
        self.target()?.update_membership(change, identity).await
    }

    async fn remote_snapshot(&self) -> RingResult<Vec<(String, String)>> {
        self.target()?.remote_snapshot().await
    }

    async fn predecessor(&self) -> RingResult<Option<NodeIdentity>> {
        self.target()?.predecessor().await
    }

    async fn successor(&self) -> RingResult<Option<NodeIdentity>> {
        self.target()?.successor().await
    }

    async fn membership(&self) -> RingResult<Vec<NodeIdentity>> {
        self.target()?.membership().await
    }
}
