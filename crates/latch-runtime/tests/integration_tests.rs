//! Cluster integration tests
//!
//! These bring up a real scheduler, worker, and server over 127.0.0.1 and
//! exercise the full coordination path: registration with rank assignment,
//! cluster-state propagation, heartbeats, peer lookup, data traffic, and
//! the graceful finish protocol.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use latch_core::{
    ClusterState, LatchConfig, MessageCommand, MessageMeta, NodeRole, NodeState, PayloadFormat,
};
use latch_runtime::{ClientReplyHandler, NodeRuntime};
use latch_tcp::TcpClient;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

/// Start a scheduler on a free port and return it with a config pointing at it
async fn start_cluster_scheduler(worker_num: u32, server_num: u32) -> (NodeRuntime, LatchConfig) {
    let mut config = LatchConfig::testing();
    config.cluster.worker_num = worker_num;
    config.cluster.server_num = server_num;
    config.cluster.scheduler_port = 0;

    let mut scheduler = NodeRuntime::builder(NodeRole::Scheduler)
        .node_id("sched-0")
        .config(config.clone())
        .build()
        .unwrap();
    scheduler.start().await.unwrap();

    let addr = scheduler.local_addr().unwrap();
    config.cluster.scheduler_host = addr.ip().to_string();
    config.cluster.scheduler_port = addr.port();
    (scheduler, config)
}

async fn start_member(role: NodeRole, id: &str, config: &LatchConfig) -> NodeRuntime {
    let mut runtime = NodeRuntime::builder(role)
        .node_id(id)
        .config(config.clone())
        .build()
        .unwrap();
    runtime.start().await.unwrap();
    runtime
}

/// Poll until the node's cached cluster state matches, or panic on timeout
async fn expect_cluster_state(runtime: &NodeRuntime, want: ClusterState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if runtime.node().cluster_state() == want {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node {} never observed {want}, still at {}",
            runtime.node().node_id(),
            runtime.node().cluster_state()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ----------------------------------------------------------------------------
// Cluster Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_cluster_start_and_graceful_finish() {
    let (mut scheduler, config) = start_cluster_scheduler(1, 1).await;
    let mut worker = start_member(NodeRole::Worker, "w-0", &config).await;
    let mut server = start_member(NodeRole::Server, "s-0", &config).await;

    assert_eq!(worker.node().state(), NodeState::Ready);
    assert_eq!(server.node().state(), NodeState::Ready);
    assert_eq!(scheduler.node().state(), NodeState::Ready);

    // Ranks are assigned per role group, starting at zero.
    assert_eq!(worker.node().rank_id(), 0);
    assert_eq!(server.node().rank_id(), 0);

    // Every party converges on the ready cluster state (push or pull).
    expect_cluster_state(&scheduler, ClusterState::ClusterReady).await;
    expect_cluster_state(&worker, ClusterState::ClusterReady).await;
    expect_cluster_state(&server, ClusterState::ClusterReady).await;

    // Graceful drain: members finish, then the scheduler observes it.
    let scheduler_finish = tokio::spawn(async move {
        let result = scheduler.finish().await;
        result.map(|_| scheduler)
    });
    worker.finish().await.unwrap();
    server.finish().await.unwrap();
    let scheduler = timeout(Duration::from_secs(5), scheduler_finish)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(worker.node().state(), NodeState::Finished);
    assert_eq!(server.node().state(), NodeState::Finished);
    assert_eq!(scheduler.node().state(), NodeState::Finished);
    assert_eq!(
        scheduler.node().cluster_state(),
        ClusterState::ClusterFinished
    );
}

#[tokio::test]
async fn test_second_worker_gets_next_rank() {
    let (_scheduler, config) = start_cluster_scheduler(2, 0).await;
    let w0 = start_member(NodeRole::Worker, "w-0", &config).await;
    let w1 = start_member(NodeRole::Worker, "w-1", &config).await;

    let mut ranks = [w0.node().rank_id(), w1.node().rank_id()];
    ranks.sort_unstable();
    assert_eq!(ranks, [0, 1]);
}

#[tokio::test]
async fn test_worker_start_without_scheduler_times_out() {
    // Reserve a port with no scheduler behind it.
    let dead_addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut config = LatchConfig::testing();
    config.cluster.scheduler_host = dead_addr.ip().to_string();
    config.cluster.scheduler_port = dead_addr.port();

    let mut worker = NodeRuntime::builder(NodeRole::Worker)
        .config(config)
        .build()
        .unwrap();
    assert!(worker.start().await.is_err());
    assert_eq!(worker.node().state(), NodeState::Starting);

    // A failed start can still be torn down, twice, without complaint.
    worker.stop().await.unwrap();
    worker.stop().await.unwrap();
    assert_eq!(worker.node().state(), NodeState::Stopped);
}

#[tokio::test]
async fn test_stop_twice_is_idempotent() {
    let (_scheduler, config) = start_cluster_scheduler(1, 0).await;
    let mut worker = start_member(NodeRole::Worker, "w-0", &config).await;

    worker.stop().await.unwrap();
    let after_first = worker.node().state();
    worker.stop().await.unwrap();
    assert_eq!(worker.node().state(), after_first);
    assert_eq!(after_first, NodeState::Stopped);
}

// ----------------------------------------------------------------------------
// Heartbeats and Registry
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_heartbeats_keep_members_fresh() {
    let (scheduler, config) = start_cluster_scheduler(1, 0).await;
    let _worker = start_member(NodeRole::Worker, "w-0", &config).await;

    // Several heartbeat intervals pass...
    tokio::time::sleep(config.heartbeat.interval * 4).await;

    // ...and nobody has gone silent.
    let registry = scheduler.registry().unwrap();
    assert_eq!(registry.registered_count(), 1);
    assert!(registry.silent_nodes(config.heartbeat.timeout).is_empty());
}

// ----------------------------------------------------------------------------
// Peer Lookup and Data Traffic
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_fetch_nodes_and_send_data() {
    let (_scheduler, config) = start_cluster_scheduler(1, 1).await;
    let worker = start_member(NodeRole::Worker, "w-0", &config).await;
    let server = start_member(NodeRole::Server, "s-0", &config).await;

    // The worker learns the server's address from the scheduler.
    let peers = worker.fetch_nodes().await.unwrap();
    let server_info = peers
        .iter()
        .find(|p| p.role == NodeRole::Server)
        .expect("server should be listed");
    assert_eq!(server_info.port, server.local_addr().unwrap().port());

    // Dial it and push opaque bytes; the ack satisfies the tracker.
    let node = worker.node();
    let client = TcpClient::new(server_info.endpoint(), config.transport.clone());
    client
        .connect(Arc::new(ClientReplyHandler::new(Arc::clone(node))))
        .await
        .unwrap();

    let meta = MessageMeta::new(MessageCommand::SendData, NodeRole::Worker, node.rank_id())
        .with_format(PayloadFormat::Raw);
    node.send_sync(&client, meta, b"gradient shard".to_vec())
        .await
        .unwrap();

    // Fire-and-forget on the same link allocates fresh, increasing ids.
    let meta = MessageMeta::new(MessageCommand::SendData, NodeRole::Worker, node.rank_id());
    let a = node.send_async(&client, meta.clone(), b"a".to_vec()).await;
    let b = node.send_async(&client, meta, b"b".to_vec()).await;
    assert!(b > a);
}

// ----------------------------------------------------------------------------
// Reply Correlation Under Concurrency
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_syncs_all_complete() {
    use latch_core::{NodeId, NodeInfo};
    use latch_runtime::Node;

    let (_scheduler, config) = start_cluster_scheduler(0, 1).await;
    let server = start_member(NodeRole::Server, "s-0", &config).await;

    // A bare node (no runtime, no heartbeats) so the tracker table is
    // exercised only by the sends under test.
    let node = Arc::new(Node::new(
        NodeInfo::new(NodeId::new("w-bare"), NodeRole::Worker, "127.0.0.1", 0),
        config.clone().into_shared(),
    ));
    let client = Arc::new(TcpClient::new(
        format!(
            "{}:{}",
            server.node().bound_ip(),
            server.node().bound_port()
        ),
        config.transport.clone(),
    ));
    client
        .connect(Arc::new(ClientReplyHandler::new(Arc::clone(&node))))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..10u32 {
        let node = Arc::clone(&node);
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let meta =
                MessageMeta::new(MessageCommand::SendData, NodeRole::Worker, node.rank_id());
            node.send_sync(client.as_ref(), meta, vec![i as u8; 64]).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Every sync send reclaimed its tracker entry on completion.
    assert_eq!(node.tracker().tracked_count(), 0);
}
