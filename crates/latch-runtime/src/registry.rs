//! Scheduler-side bookkeeping of registered nodes
//!
//! An explicit registry object owned by the scheduler's strategy and passed
//! by reference to whoever needs it — never a process-wide singleton. It
//! assigns ranks per role group, tracks heartbeat freshness, and counts
//! graceful finishes so the scheduler knows when the cluster is drained.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use smallvec::SmallVec;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use latch_core::{NodeId, NodeInfo, NodeRole};

// ----------------------------------------------------------------------------
// Registered Node
// ----------------------------------------------------------------------------

/// One node as the scheduler sees it
#[derive(Debug, Clone)]
pub struct RegisteredNode {
    pub info: NodeInfo,
    pub last_heartbeat: Instant,
    pub finished: bool,
}

// ----------------------------------------------------------------------------
// Node Registry
// ----------------------------------------------------------------------------

/// Registry of every worker and server known to the scheduler
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: DashMap<NodeId, RegisteredNode>,
    next_worker_rank: AtomicU32,
    next_server_rank: AtomicU32,
    /// Signaled on every registration, for ready-watchers
    registered: Notify,
    /// Signaled on every finish, for drain-watchers
    finished: Notify,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and assign its rank
    ///
    /// Re-registration under the same node id (a recovering node) keeps the
    /// original rank and refreshes the address and heartbeat instead of
    /// burning a new one.
    pub fn register(&self, info: NodeInfo) -> u32 {
        if let Some(mut existing) = self.nodes.get_mut(&info.node_id) {
            let rank = existing.info.rank_id;
            info!(node_id = %info.node_id, rank, "node re-registered");
            existing.info.ip = info.ip;
            existing.info.port = info.port;
            existing.last_heartbeat = Instant::now();
            existing.finished = false;
            return rank;
        }

        let counter = match info.role {
            NodeRole::Worker => &self.next_worker_rank,
            NodeRole::Server => &self.next_server_rank,
            NodeRole::Scheduler => {
                warn!(node_id = %info.node_id, "scheduler tried to register with itself");
                &self.next_worker_rank
            }
        };
        let rank = counter.fetch_add(1, Ordering::SeqCst);

        let mut registered = info;
        registered.rank_id = rank;
        info!(node_id = %registered.node_id, role = %registered.role, rank, "node registered");
        self.nodes.insert(
            registered.node_id.clone(),
            RegisteredNode {
                info: registered,
                last_heartbeat: Instant::now(),
                finished: false,
            },
        );
        self.registered.notify_waiters();
        rank
    }

    /// Refresh a node's heartbeat; false for unknown nodes
    pub fn heartbeat(&self, node_id: &NodeId) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(mut node) => {
                node.last_heartbeat = Instant::now();
                true
            }
            None => {
                debug!(%node_id, "heartbeat from unregistered node");
                false
            }
        }
    }

    /// Record a graceful finish; returns the total finished so far
    pub fn mark_finished(&self, node_id: &NodeId) -> usize {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.finished = true;
        } else {
            debug!(%node_id, "finish from unregistered node");
        }
        let count = self.finished_count();
        self.finished.notify_waiters();
        count
    }

    /// Number of registered nodes
    pub fn registered_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes that announced a graceful finish
    pub fn finished_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.finished).count()
    }

    /// Snapshot of every registered node's identity
    pub fn snapshot(&self) -> SmallVec<[NodeInfo; 8]> {
        self.nodes.iter().map(|n| n.info.clone()).collect()
    }

    /// Nodes whose last heartbeat is older than `ttl`
    pub fn silent_nodes(&self, ttl: Duration) -> SmallVec<[NodeId; 4]> {
        let now = Instant::now();
        self.nodes
            .iter()
            .filter(|n| !n.finished && now.duration_since(n.last_heartbeat) > ttl)
            .map(|n| n.info.node_id.clone())
            .collect()
    }

    /// Wait until `expected` nodes have registered; false on timeout
    pub async fn wait_all_registered(&self, expected: usize, timeout: Duration) -> bool {
        self.wait_count(&self.registered, || self.registered_count() >= expected, timeout)
            .await
    }

    /// Wait until `expected` nodes have finished; false on timeout
    pub async fn wait_all_finished(&self, expected: usize, timeout: Duration) -> bool {
        self.wait_count(&self.finished, || self.finished_count() >= expected, timeout)
            .await
    }

    async fn wait_count<F: Fn() -> bool>(
        &self,
        notify: &Notify,
        satisfied: F,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if satisfied() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return satisfied();
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
