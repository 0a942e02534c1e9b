//! Migration of stored pairs after a node joins.
//!
//! Migration is pull-and-filter: the introducer asks the joining node's
//! successor for every pair the successor no longer owns, and puts each pair
//! again through its own router, which delivers it to the new owner. The
//! successor deletes the pairs it hands over.
//!
//! Nothing is batched or retried. The first failing put aborts the rest of
//! the migration; pairs not yet delivered stay lost until written again.

use {
    crate::{
        RingResult,
        identity::NodeIdentity,
        node::RingNode,
        service::Operation,
    },
    std::hash::BuildHasher,
    tracing::{debug, warn},
};

/// Removes and returns every stored pair `node` does not own.
pub(crate) fn take_misplaced<H>(node: &RingNode<H>) -> RingResult<Vec<(String, String)>>
where
    H: BuildHasher + Send + Sync + 'static,
{
    let storage = node.storage();
    let misplaced: Vec<_> = storage
        .scan()?
        .into_iter()
        .filter(|(key, _)| !node.is_belong_me(node.position(key)))
        .collect();
    for (key, _) in &misplaced {
        storage.delete(key)?;
    }
    debug!(node = %node.identity(), count = misplaced.len(), "handing over misplaced pairs");
    Ok(misplaced)
}

/// Moves the pairs `source` no longer owns to their owners.
///
/// Returns the number of pairs moved.
pub(crate) async fn pull_misplaced<H>(node: &RingNode<H>, source: &NodeIdentity) -> RingResult<usize>
where
    H: BuildHasher + Send + Sync + 'static,
{
    let entries = if *source == node.identity() {
        take_misplaced(node)?
    } else {
        node.remote(source, |peer| async move { peer.remote_snapshot().await })
            .await?
    };

    let total = entries.len();
    for (moved, (key, value)) in entries.into_iter().enumerate() {
        if let Err(err) = node.route(key, Some(value), Operation::Put).await {
            warn!(%source, moved, total, "pairs left undelivered");
            return Err(err);
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            NodeBuilder,
            NodeConfig,
            RingError,
            service::{MembershipChange, RingService},
            testing::DigitsHasher,
            transport::LocalNetwork,
        },
        std::time::Duration,
    };

    fn local_node(network: &LocalNetwork, port: u16) -> RingNode<DigitsHasher> {
        let config = NodeConfig::new("127.0.0.1", port, 4)
            .with_stable_poll_interval(Duration::from_millis(10))
            .with_rpc_timeout(Duration::from_millis(200));
        NodeBuilder::with_build_hasher(config, DigitsHasher)
            .with_transport(network.clone())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn sole_node_keeps_everything() {
        let node = local_node(&LocalNetwork::new(), 7011);
        node.start().await.unwrap();
        for i in 0..16 {
            node.put(format!("key-{i}"), "v").await.unwrap();
        }
        assert!(take_misplaced(&node).unwrap().is_empty());
        assert_eq!(node.storage().scan().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn takes_only_what_is_no_longer_owned() {
        let network = LocalNetwork::new();
        let node = local_node(&network, 7011);
        node.start().await.unwrap();
        for key in ["key-2", "key-3", "key-5", "key-9", "key-12"] {
            node.put(key, key).await.unwrap();
        }

        // A peer at 9 becomes the predecessor: (9, 3] is left to the node.
        let peer = NodeIdentity::new("127.0.0.1", 7017, node.ring());
        node.update_membership(MembershipChange::Join, peer.clone())
            .await
            .unwrap();
        node.change_predecessor(peer).await.unwrap();

        let mut taken = take_misplaced(&node).unwrap();
        taken.sort();
        assert_eq!(
            taken,
            vec![
                ("key-5".to_string(), "key-5".to_string()),
                ("key-9".to_string(), "key-9".to_string()),
            ]
        );
        let kept: Vec<_> = node
            .storage()
            .scan()
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(kept, vec!["key-12", "key-2", "key-3"]);
    }

    #[tokio::test]
    async fn unreachable_source_aborts() {
        let network = LocalNetwork::new();
        let node = local_node(&network, 7011);
        node.start().await.unwrap();

        let gone = NodeIdentity::new("127.0.0.1", 7017, node.ring());
        assert!(matches!(
            pull_misplaced(&node, &gone).await,
            Err(RingError::RemoteCallFailure { peer, .. }) if peer == "127.0.0.1:7017"
        ));
    }
}
