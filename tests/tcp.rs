use {
    ringdht::{
        NodeBuilder,
        NodeConfig,
        Phase,
        RingNode,
        RingService,
        transport::{TcpTransport, Transport},
    },
    std::{net::TcpListener, time::Duration},
    tracing_subscriber::EnvFilter,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn tcp_node(port: u16, introducer: Option<u16>) -> RingNode {
    let mut config = NodeConfig::new("127.0.0.1", port, 32)
        .with_stable_poll_interval(Duration::from_millis(10))
        .with_max_stable_polls(300)
        .with_rpc_timeout(Duration::from_secs(5));
    if let Some(introducer) = introducer {
        config = config.with_introducer("127.0.0.1", introducer);
    }
    NodeBuilder::new(config).build().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ring_over_tcp() {
    init_tracing();
    let (port_a, port_b, port_c) = (free_port(), free_port(), free_port());

    let a = tcp_node(port_a, None);
    a.start().await.unwrap();
    for i in 0..32 {
        a.put(format!("key-{i}"), format!("v{i}")).await.unwrap();
    }

    let b = tcp_node(port_b, Some(port_a));
    b.start().await.unwrap();
    let c = tcp_node(port_c, Some(port_b));
    c.start().await.unwrap();
    let nodes = [a.clone(), b.clone(), c.clone()];
    for node in &nodes {
        node.wait_stable().await.unwrap();
        assert_eq!(node.state().membership().size(), 2);
    }

    for node in &nodes {
        for i in 0..32 {
            assert_eq!(
                node.get(format!("key-{i}")).await.unwrap(),
                Some(format!("v{i}"))
            );
        }
    }

    let proxy = TcpTransport::new().connect(&c.identity());
    assert_eq!(proxy.membership().await.unwrap().len(), 2);
    assert_eq!(
        proxy.predecessor().await.unwrap(),
        c.state().predecessor().cloned()
    );
    assert_eq!(
        TcpTransport::new()
            .connect(&a.identity())
            .get_predecessor_of(c.identity().hash())
            .await
            .unwrap(),
        c.state().predecessor().cloned()
    );

    b.append("key-0", "!").await.unwrap();
    assert_eq!(c.get("key-0").await.unwrap(), Some("v0!".to_string()));

    c.leave().await.unwrap();
    assert_eq!(c.phase(), Phase::Destroyed);
    a.wait_stable().await.unwrap();
    b.wait_stable().await.unwrap();
    assert!(!a.state().membership().contains(&c.identity()));
    assert!(!b.state().membership().contains(&c.identity()));

    a.put("after-leave", "v").await.unwrap();
    assert_eq!(b.get("after-leave").await.unwrap(), Some("v".to_string()));
}
