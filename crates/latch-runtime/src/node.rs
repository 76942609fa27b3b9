//! The shared Node base
//!
//! One `Node` exists per process. It owns the request tracker, the
//! lifecycle state machine, the cached advisory cluster state, and the
//! synchronous/asynchronous send API that every role builds on. Role
//! behavior lives in strategy objects; this type is role-agnostic.
//!
//! All shared state here is protected by short, never-awaited critical
//! sections; the blocking waits are async and every one of them takes an
//! explicit timeout.

use std::sync::{Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use latch_core::{
    ClusterState, Envelope, LatchError, MessageMeta, MessageTracker, NodeEvent, NodeId, NodeInfo,
    NodeRole, NodeState, SharedLatchConfig, StateError, Transport, WireFormat,
};

// ----------------------------------------------------------------------------
// Node
// ----------------------------------------------------------------------------

/// A process participating in the cluster coordination protocol
pub struct Node {
    /// Identity; rank and bound address are assigned once, early
    info: RwLock<NodeInfo>,
    /// Shared configuration
    config: SharedLatchConfig,
    /// Request id allocation and response counting
    tracker: MessageTracker,
    /// Authoritative lifecycle state, mirrored into the watch channel
    state: Mutex<NodeState>,
    /// Broadcasts every lifecycle transition to waiters
    state_tx: watch::Sender<NodeState>,
    /// Advisory cluster state cached from scheduler messages
    cluster_state: RwLock<ClusterState>,
    /// Peer list from the last FetchNodes reply
    peers: RwLock<Vec<NodeInfo>>,
}

impl Node {
    pub fn new(info: NodeInfo, config: SharedLatchConfig) -> Self {
        let (state_tx, _) = watch::channel(NodeState::Starting);
        Self {
            info: RwLock::new(info),
            config,
            tracker: MessageTracker::new(),
            state: Mutex::new(NodeState::Starting),
            state_tx,
            cluster_state: RwLock::new(ClusterState::ClusterStarting),
            peers: RwLock::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn info(&self) -> NodeInfo {
        self.info.read().expect("node info lock poisoned").clone()
    }

    pub fn node_id(&self) -> NodeId {
        self.info.read().expect("node info lock poisoned").node_id.clone()
    }

    pub fn rank_id(&self) -> u32 {
        self.info.read().expect("node info lock poisoned").rank_id
    }

    pub fn role(&self) -> NodeRole {
        self.info.read().expect("node info lock poisoned").role
    }

    pub fn bound_ip(&self) -> String {
        self.info.read().expect("node info lock poisoned").ip.clone()
    }

    pub fn bound_port(&self) -> u16 {
        self.info.read().expect("node info lock poisoned").port
    }

    /// Record the rank the scheduler assigned to this node
    ///
    /// The rank is set once at registration; a differing re-assignment is
    /// logged and ignored.
    pub fn assign_rank(&self, rank_id: u32) {
        let mut info = self.info.write().expect("node info lock poisoned");
        if info.rank_id != 0 && info.rank_id != rank_id {
            warn!(
                current = info.rank_id,
                offered = rank_id,
                "ignoring conflicting rank assignment"
            );
            return;
        }
        info.rank_id = rank_id;
        debug!(node_id = %info.node_id, rank_id, "rank assigned");
    }

    /// Record the address the server socket actually bound to
    pub(crate) fn set_bound_addr(&self, ip: String, port: u16) {
        let mut info = self.info.write().expect("node info lock poisoned");
        info.ip = ip;
        info.port = port;
    }

    pub fn config(&self) -> &SharedLatchConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn state(&self) -> NodeState {
        *self.state.lock().expect("node state lock poisoned")
    }

    /// Subscribe to lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<NodeState> {
        self.state_tx.subscribe()
    }

    /// Apply a lifecycle event through the checked transition table
    ///
    /// Idempotent events (second stop, second finish) succeed without a
    /// state change; invalid transitions surface as [`StateError`].
    pub fn apply_event(&self, event: NodeEvent) -> Result<NodeState, StateError> {
        let mut state = self.state.lock().expect("node state lock poisoned");
        let current = *state;
        let next = current.apply(event)?;
        if next != current {
            info!(node_id = %self.node_id(), from = %current, to = %next, "node state transition");
            *state = next;
            let _ = self.state_tx.send(next);
        }
        Ok(next)
    }

    /// Wait until the node is ready, or fail after `timeout`
    pub async fn wait_for_start(&self, timeout: Duration) -> Result<(), LatchError> {
        match self.wait_for_state(|s| s == NodeState::Ready || s.is_terminal(), timeout).await {
            Some(NodeState::Ready) => Ok(()),
            Some(state) => Err(LatchError::config_error(format!(
                "node reached {state} before becoming ready"
            ))),
            None => Err(LatchError::StartTimeout {
                duration_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Wait until the node has finished, or fail after `timeout`
    pub async fn wait_for_finish(&self, timeout: Duration) -> Result<(), LatchError> {
        match self.wait_for_state(|s| s.is_terminal(), timeout).await {
            Some(_) => Ok(()),
            None => Err(LatchError::FinishTimeout {
                duration_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Wait until the lifecycle state satisfies `pred`; None on timeout
    pub async fn wait_for_state<F>(&self, pred: F, timeout: Duration) -> Option<NodeState>
    where
        F: Fn(NodeState) -> bool,
    {
        let mut rx = self.state_tx.subscribe();
        // wait_for checks the value seen at subscription first, so a
        // transition that happened before this call is not missed.
        let result = match tokio::time::timeout(timeout, rx.wait_for(|s| pred(*s))).await {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        };
        result
    }

    // ------------------------------------------------------------------
    // Cluster state (advisory)
    // ------------------------------------------------------------------

    pub fn cluster_state(&self) -> ClusterState {
        *self.cluster_state.read().expect("cluster state lock poisoned")
    }

    /// Cache the cluster state received from the scheduler
    pub fn set_cluster_state(&self, next: ClusterState) {
        let mut current = self.cluster_state.write().expect("cluster state lock poisoned");
        if *current != next {
            debug!(node_id = %self.node_id(), from = %*current, to = %next, "cluster state update");
            *current = next;
        }
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    pub fn peers(&self) -> Vec<NodeInfo> {
        self.peers.read().expect("peer list lock poisoned").clone()
    }

    pub(crate) fn set_peers(&self, peers: Vec<NodeInfo>) {
        *self.peers.write().expect("peer list lock poisoned") = peers;
    }

    // ------------------------------------------------------------------
    // Send API
    // ------------------------------------------------------------------

    pub fn tracker(&self) -> &MessageTracker {
        &self.tracker
    }

    /// Report one arriving reply to the tracker
    pub fn notify_arrival(&self, meta: &MessageMeta) {
        self.tracker.notify_arrival(meta);
    }

    /// Block (async) until the tracked request is satisfied or timed out
    pub async fn wait(&self, request_id: u64, timeout: Duration) -> bool {
        self.tracker.wait(request_id, timeout).await
    }

    /// Encode and transmit an envelope whose request id is already stamped
    ///
    /// Used by the sync wrapper after tracking, and by broadcast callers
    /// that stamp one id across several sends.
    pub async fn dispatch(
        &self,
        client: &dyn Transport,
        meta: &MessageMeta,
        payload: Vec<u8>,
    ) -> Result<(), LatchError> {
        let frame = WireFormat::encode(&Envelope::new(meta.clone(), payload))?;
        client.send(frame).await?;
        Ok(())
    }

    /// Fire-and-forget send
    ///
    /// Allocates and returns a fresh request id regardless of transport
    /// outcome; a failed send is logged and otherwise indistinguishable
    /// from a response that never arrives. Callers that need confirmation
    /// track the id themselves or use [`Node::send_sync`].
    pub async fn send_async(
        &self,
        client: &dyn Transport,
        mut meta: MessageMeta,
        payload: Vec<u8>,
    ) -> u64 {
        let request_id = self.tracker.next_request_id();
        meta.request_id = request_id;
        if let Err(e) = self.dispatch(client, &meta, payload).await {
            warn!(
                request_id,
                endpoint = %client.endpoint(),
                error = %e,
                "async send failed; response will never arrive"
            );
        }
        request_id
    }

    /// Send one request and wait for its single response
    ///
    /// Uses the configured per-request communication timeout.
    pub async fn send_sync(
        &self,
        client: &dyn Transport,
        meta: MessageMeta,
        payload: Vec<u8>,
    ) -> Result<(), LatchError> {
        self.send_sync_timeout(client, meta, payload, self.config.timeouts.comm)
            .await
    }

    /// Send one request and wait for its single response, bounded by `timeout`
    ///
    /// Fails fast when the underlying send fails — the caller is never left
    /// blocking out the full timeout for a response that cannot arrive. No
    /// retry happens here; retry policy belongs to the calling protocol.
    pub async fn send_sync_timeout(
        &self,
        client: &dyn Transport,
        mut meta: MessageMeta,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), LatchError> {
        let request_id = self.tracker.add_track(1);
        meta.request_id = request_id;

        if let Err(e) = self.dispatch(client, &meta, payload).await {
            self.tracker.remove_track(request_id);
            return Err(e);
        }

        let satisfied = self.tracker.wait(request_id, timeout).await;
        self.tracker.remove_track(request_id);
        if satisfied {
            Ok(())
        } else {
            Err(LatchError::response_timeout(request_id, timeout))
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use latch_core::{LatchConfig, MessageCommand, TransportError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    /// Transport whose sends always fail
    struct FailingTransport {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Transport for FailingTransport {
        async fn send(&self, _frame: Vec<u8>) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::NotConnected {
                endpoint: self.endpoint(),
            })
        }

        fn is_connected(&self) -> bool {
            false
        }

        fn endpoint(&self) -> String {
            "mem://failing".to_string()
        }
    }

    fn test_node() -> Node {
        let info = NodeInfo::new(NodeId::new("w-test"), NodeRole::Worker, "127.0.0.1", 0);
        Node::new(info, LatchConfig::testing().into_shared())
    }

    fn data_meta() -> MessageMeta {
        MessageMeta::new(MessageCommand::SendData, NodeRole::Worker, 0)
    }

    #[tokio::test]
    async fn test_send_sync_fails_fast_on_dead_transport() {
        let node = test_node();
        let transport = FailingTransport {
            attempts: AtomicU32::new(0),
        };

        let started = Instant::now();
        let err = node
            .send_sync_timeout(&transport, data_meta(), vec![], Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, LatchError::Transport(_)));
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "must not block out the full timeout"
        );
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
        // The failed send's tracker entry was reclaimed.
        assert_eq!(node.tracker().tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_send_async_advances_ids_even_on_failure() {
        let node = test_node();
        let transport = FailingTransport {
            attempts: AtomicU32::new(0),
        };

        let a = node.send_async(&transport, data_meta(), vec![]).await;
        let b = node.send_async(&transport, data_meta(), vec![]).await;
        assert!(b > a);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_send_sync_times_out_without_reply() {
        let node = test_node();

        /// Transport that swallows frames without error
        struct BlackholeTransport;

        #[async_trait]
        impl Transport for BlackholeTransport {
            async fn send(&self, _frame: Vec<u8>) -> Result<(), TransportError> {
                Ok(())
            }
            fn is_connected(&self) -> bool {
                true
            }
            fn endpoint(&self) -> String {
                "mem://blackhole".to_string()
            }
        }

        let err = node
            .send_sync_timeout(&BlackholeTransport, data_meta(), vec![], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, LatchError::ResponseTimeout { .. }));
    }

    #[tokio::test]
    async fn test_stop_twice_matches_stop_once() {
        let node = test_node();
        node.apply_event(NodeEvent::StartCompleted).unwrap();

        let once = node.apply_event(NodeEvent::StopRequested).unwrap();
        let twice = node.apply_event(NodeEvent::StopRequested).unwrap();
        assert_eq!(once, twice);
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_wait_for_start() {
        let node = std::sync::Arc::new(test_node());

        let waiter = {
            let node = std::sync::Arc::clone(&node);
            tokio::spawn(async move { node.wait_for_start(Duration::from_secs(5)).await })
        };
        node.apply_event(NodeEvent::StartCompleted).unwrap();
        waiter.await.unwrap().unwrap();

        // And the timeout path.
        let other = test_node();
        let err = other.wait_for_start(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, LatchError::StartTimeout { .. }));
    }

    #[test]
    fn test_rank_assigned_once() {
        let node = test_node();
        node.assign_rank(4);
        assert_eq!(node.rank_id(), 4);
        node.assign_rank(9);
        assert_eq!(node.rank_id(), 4);
    }
}
