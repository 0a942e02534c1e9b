use {
    crate::{
        NodeConfig,
        RingResult,
        hash::RingHasher,
        node::RingNode,
        ring::Ring,
        storage::{MemoryStorage, StorageService},
        transport::{TcpTransport, Transport},
    },
    std::{hash::BuildHasher, sync::Arc},
};

/// Ring node builder.
///
/// Unless told otherwise, the node keeps its pairs in a [`MemoryStorage`] and
/// talks to its peers over [`TcpTransport`].
pub struct NodeBuilder<H = RingHasher> {
    config: NodeConfig,
    build_hasher: H,
    storage: Option<Arc<dyn StorageService>>,
    transport: Option<Arc<dyn Transport>>,
}

impl NodeBuilder {
    /// Create new node builder.
    pub fn new(config: NodeConfig) -> Self {
        Self::with_build_hasher(config, RingHasher::default())
    }
}

impl<H> NodeBuilder<H>
where
    H: BuildHasher + Send + Sync + 'static,
{
    /// Create new node builder placing identities and keys with the given
    /// hasher.
    ///
    /// Every node of a ring must use the same hasher.
    pub fn with_build_hasher(config: NodeConfig, build_hasher: H) -> Self {
        Self {
            config,
            build_hasher,
            storage: None,
            transport: None,
        }
    }

    /// Use the given store for the node's pairs.
    pub fn with_storage<S: StorageService + 'static>(mut self, storage: S) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Use the given transport to serve and reach peers.
    pub fn with_transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Build the node. The node is not started.
    pub fn build(self) -> RingResult<RingNode<H>> {
        self.config.validate()?;
        let ring = Ring::with_build_hasher(self.config.ring_bits, self.build_hasher)?;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let transport = self
            .transport
            .unwrap_or_else(|| {
                Arc::new(TcpTransport::new().with_request_timeout(self.config.rpc_timeout))
            });
        Ok(RingNode::new(self.config, ring, storage, transport))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{RingError, state::Phase, testing::DigitsHasher},
    };

    #[test]
    fn builds_unstarted_node() {
        let node = NodeBuilder::with_build_hasher(NodeConfig::new("127.0.0.1", 7011, 4), DigitsHasher)
            .build()
            .unwrap();
        assert_eq!(node.phase(), Phase::Created);
        assert_eq!(node.identity().hash(), 3);
        assert_eq!(node.ring().len(), 16);
        assert!(node.state().membership().is_empty());
    }

    #[test]
    fn shared_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let node = NodeBuilder::new(NodeConfig::new("127.0.0.1", 7011, 16))
            .with_storage(storage.clone())
            .build()
            .unwrap();
        node.storage().put("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn rejects_invalid_config() {
        let result = NodeBuilder::new(NodeConfig::new("127.0.0.1", 7011, 0)).build();
        assert!(matches!(result, Err(RingError::Config(_))));
    }
}
