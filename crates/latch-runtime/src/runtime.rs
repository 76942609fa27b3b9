//! Node runtime orchestration
//!
//! [`NodeRuntime`] wires the pieces together for one process: it binds the
//! node's TCP server behind a [`NodeDispatcher`], connects the outbound
//! link to the scheduler, runs the registration handshake, and keeps the
//! heartbeat and tracker-maintenance loops alive until the node reaches a
//! terminal state.
//!
//! Start, stop, and finish mirror the node lifecycle: `start` takes the
//! node from Starting to Ready, `finish` drives the graceful
//! Finishing → Finished path, and `stop` forces immediate teardown from
//! anywhere. Stop and finish are idempotent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use latch_core::{
    ClusterState, LatchError, MessageCommand, MessageMeta, NodeEvent, NodeState, PayloadFormat,
    RecoveryStore, Transport,
};
use latch_tcp::{TcpClient, TcpServer};

use crate::builder::NodeRuntimeBuilder;
use crate::dispatch::{ClientReplyHandler, NodeDispatcher};
use crate::messages::{self, FinishNotice, HeartbeatPing, RegisterRequest, StateSync};
use crate::node::Node;
use crate::registry::NodeRegistry;
use crate::roles::RoleStrategy;

// ----------------------------------------------------------------------------
// Node Runtime
// ----------------------------------------------------------------------------

/// Orchestrates one node process end to end
pub struct NodeRuntime {
    node: Arc<Node>,
    strategy: Arc<dyn RoleStrategy>,
    registry: Option<Arc<NodeRegistry>>,
    listen_addr: String,
    server: Option<TcpServer>,
    scheduler_client: Option<Arc<TcpClient>>,
    background: Vec<JoinHandle<()>>,
    recovery: Option<RecoveryStore>,
}

impl std::fmt::Debug for NodeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRuntime")
            .field("listen_addr", &self.listen_addr)
            .field("has_registry", &self.registry.is_some())
            .field("has_server", &self.server.is_some())
            .field("has_scheduler_client", &self.scheduler_client.is_some())
            .field("background_tasks", &self.background.len())
            .field("has_recovery", &self.recovery.is_some())
            .finish()
    }
}

impl NodeRuntime {
    /// Start building a runtime for the given role
    pub fn builder(role: latch_core::NodeRole) -> NodeRuntimeBuilder {
        NodeRuntimeBuilder::new(role)
    }

    pub(crate) fn from_parts(
        node: Arc<Node>,
        strategy: Arc<dyn RoleStrategy>,
        registry: Option<Arc<NodeRegistry>>,
        listen_addr: String,
    ) -> Self {
        Self {
            node,
            strategy,
            registry,
            listen_addr,
            server: None,
            scheduler_client: None,
            background: Vec::new(),
            recovery: None,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Address the node's server is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr())
    }

    /// Scheduler-side registry; None for workers and servers
    pub fn registry(&self) -> Option<&Arc<NodeRegistry>> {
        self.registry.as_ref()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Bring the node up: bind, register, reach Ready
    ///
    /// Workers and servers block on the registration handshake (bounded by
    /// the cluster-available timeout); the scheduler is ready as soon as it
    /// listens.
    pub async fn start(&mut self) -> Result<(), LatchError> {
        if self.node.state() != NodeState::Starting {
            return Err(LatchError::config_error(format!(
                "cannot start node in state {}",
                self.node.state()
            )));
        }
        let config = Arc::clone(self.node.config());

        if let Some(recovery) = &config.recovery {
            let store = RecoveryStore::load(&recovery.path)?;
            if let Some(rank) = store.get("rank_id").and_then(|v| v.as_u64()) {
                self.node.assign_rank(rank as u32);
            }
            self.recovery = Some(store);
        }

        let mut server = TcpServer::bind(&self.listen_addr, config.transport.clone()).await?;
        let addr = server.local_addr();
        self.node.set_bound_addr(addr.ip().to_string(), addr.port());
        server.start(Arc::new(NodeDispatcher::new(
            Arc::clone(&self.node),
            Arc::clone(&self.strategy),
        )));
        self.server = Some(server);

        self.strategy.on_start(&self.node).await?;

        match self.registry.clone() {
            Some(registry) => {
                // The scheduler is the registration endpoint; it is ready
                // the moment it listens.
                self.node.apply_event(NodeEvent::StartCompleted)?;
                self.background.push(tokio::spawn(ready_watcher(
                    Arc::clone(&self.node),
                    registry,
                )));
            }
            None => {
                let client = Arc::new(TcpClient::new(
                    config.cluster.scheduler_endpoint(),
                    config.transport.clone(),
                ));
                client
                    .connect(Arc::new(ClientReplyHandler::new(Arc::clone(&self.node))))
                    .await?;

                let meta = MessageMeta::new(
                    MessageCommand::Register,
                    self.node.role(),
                    self.node.rank_id(),
                )
                .with_format(PayloadFormat::Bincode);
                let payload = messages::encode(&RegisterRequest {
                    info: self.node.info(),
                })?;
                self.node
                    .send_sync_timeout(
                        client.as_ref(),
                        meta,
                        payload,
                        config.timeouts.cluster_available,
                    )
                    .await?;

                self.node.apply_event(NodeEvent::StartCompleted)?;
                self.background
                    .push(tokio::spawn(heartbeat_loop(Arc::clone(&self.node), Arc::clone(&client))));
                self.scheduler_client = Some(client);
            }
        }

        self.background
            .push(tokio::spawn(maintenance_loop(Arc::clone(&self.node))));

        if let Some(store) = &mut self.recovery {
            store.put("node_id", self.node.node_id().as_str());
            store.put("rank_id", self.node.rank_id() as u64);
            store.persist()?;
        }

        info!(node = %self.node.info(), "node started");
        Ok(())
    }

    /// Force immediate teardown without graceful finish semantics
    ///
    /// Legal from any non-terminal state; calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<(), LatchError> {
        let was_terminal = self.node.state().is_terminal();
        self.node.apply_event(NodeEvent::StopRequested)?;
        if !was_terminal {
            self.teardown().await;
            info!(node_id = %self.node.node_id(), "node stopped");
        }
        Ok(())
    }

    /// Graceful shutdown with the configured finish timeout
    pub async fn finish(&mut self) -> Result<(), LatchError> {
        let timeout = self.node.config().timeouts.finish;
        self.finish_timeout(timeout).await
    }

    /// Graceful shutdown bounded by `timeout`
    ///
    /// Workers and servers announce their finish to the scheduler and wait
    /// for its acknowledgement; the scheduler waits for every expected node
    /// to announce, then pushes the final cluster state. On timeout the
    /// node stays in Finishing — callers typically escalate to `stop`.
    pub async fn finish_timeout(&mut self, timeout: Duration) -> Result<(), LatchError> {
        if self.node.state().is_terminal() {
            return Ok(());
        }
        self.node.apply_event(NodeEvent::FinishRequested)?;

        match self.registry.clone() {
            Some(registry) => {
                let expected = self.node.config().cluster.expected_nodes() as usize;
                if !registry.wait_all_finished(expected, timeout).await {
                    return Err(LatchError::FinishTimeout {
                        duration_ms: timeout.as_millis() as u64,
                    });
                }
                // Best effort: nodes that already went away just miss the
                // final push.
                broadcast_state(&self.node, &registry, ClusterState::ClusterFinished).await;
            }
            None => {
                let client = self
                    .scheduler_client
                    .as_ref()
                    .ok_or_else(|| LatchError::config_error("node has no scheduler link"))?;
                let meta = MessageMeta::new(
                    MessageCommand::Finish,
                    self.node.role(),
                    self.node.rank_id(),
                )
                .with_format(PayloadFormat::Bincode);
                let payload = messages::encode(&FinishNotice {
                    node_id: self.node.node_id(),
                })?;
                self.node
                    .send_sync_timeout(client.as_ref(), meta, payload, timeout)
                    .await?;
            }
        }

        self.node.apply_event(NodeEvent::ShutdownAcked)?;
        self.teardown().await;
        info!(node_id = %self.node.node_id(), "node finished");
        Ok(())
    }

    async fn teardown(&mut self) {
        for handle in self.background.drain(..) {
            handle.abort();
        }
        if let Some(server) = &self.server {
            server.shutdown();
        }
        if let Some(client) = &self.scheduler_client {
            client.disconnect().await;
        }
        if let Some(store) = &mut self.recovery {
            store.put("last_state", self.node.state().as_str());
            if let Err(e) = store.persist() {
                warn!(error = %e, "failed to persist recovery state at teardown");
            }
        }
    }

    // ------------------------------------------------------------------
    // Cluster queries
    // ------------------------------------------------------------------

    /// Ask the scheduler for the current peer list and cache it
    pub async fn fetch_nodes(&self) -> Result<Vec<latch_core::NodeInfo>, LatchError> {
        let client = self
            .scheduler_client
            .as_ref()
            .ok_or_else(|| LatchError::config_error("node has no scheduler link"))?;
        let meta = MessageMeta::new(
            MessageCommand::FetchNodes,
            self.node.role(),
            self.node.rank_id(),
        )
        .with_format(PayloadFormat::Bincode);
        self.node.send_sync(client.as_ref(), meta, Vec::new()).await?;
        Ok(self.node.peers())
    }
}

impl Drop for NodeRuntime {
    fn drop(&mut self) {
        // Abort loops if the runtime is dropped while running.
        for handle in self.background.drain(..) {
            handle.abort();
        }
        if let Some(server) = &self.server {
            server.shutdown();
        }
    }
}

// ----------------------------------------------------------------------------
// Background Loops
// ----------------------------------------------------------------------------

/// Scheduler only: once every expected node has registered, push the ready
/// state to all of them
async fn ready_watcher(node: Arc<Node>, registry: Arc<NodeRegistry>) {
    let config = Arc::clone(node.config());
    let expected = config.cluster.expected_nodes() as usize;
    if registry
        .wait_all_registered(expected, config.timeouts.cluster_available)
        .await
    {
        broadcast_state(&node, &registry, ClusterState::ClusterReady).await;
    } else {
        warn!(
            registered = registry.registered_count(),
            expected, "cluster did not fully register within timeout"
        );
    }
}

/// Push a cluster state to every registered node and wait for the
/// acknowledgement count
///
/// One request id is tracked across the whole fan-out, so the wait is
/// satisfied only when every reachable node has acknowledged.
async fn broadcast_state(node: &Arc<Node>, registry: &NodeRegistry, state: ClusterState) {
    let config = node.config();
    let peers = registry.snapshot();
    if peers.is_empty() {
        return;
    }

    let mut clients = Vec::new();
    for info in &peers {
        let client = Arc::new(TcpClient::new(info.endpoint(), config.transport.clone()));
        match client
            .connect(Arc::new(ClientReplyHandler::new(Arc::clone(node))))
            .await
        {
            Ok(()) => clients.push(client),
            Err(e) => warn!(peer = %info, error = %e, "state push skipped unreachable node"),
        }
    }
    if clients.is_empty() {
        return;
    }

    let request_id = node.tracker().add_track(clients.len() as u32);
    let mut meta = MessageMeta::new(MessageCommand::SyncState, node.role(), node.rank_id())
        .with_format(PayloadFormat::Bincode);
    meta.request_id = request_id;
    let payload = match messages::encode(&StateSync {
        cluster_state: state,
    }) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "failed to encode state sync");
            node.tracker().remove_track(request_id);
            return;
        }
    };

    for client in &clients {
        if let Err(e) = node.dispatch(client.as_ref(), &meta, payload.clone()).await {
            warn!(endpoint = %client.endpoint(), error = %e, "state push failed");
        }
    }

    if !node.tracker().wait(request_id, config.timeouts.comm).await {
        warn!(%state, "state push not fully acknowledged");
    }
    node.tracker().remove_track(request_id);

    for client in &clients {
        client.disconnect().await;
    }
    debug!(%state, peers = clients.len(), "cluster state pushed");
}

/// Worker/server: periodic liveness signal to the scheduler
async fn heartbeat_loop(node: Arc<Node>, client: Arc<TcpClient>) {
    let config = Arc::clone(node.config());
    let mut state_rx = node.subscribe_state();
    let mut ticker = tokio::time::interval(config.heartbeat.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if node.state().is_terminal() {
                    break;
                }
                let meta = MessageMeta::new(
                    MessageCommand::Heartbeat,
                    node.role(),
                    node.rank_id(),
                )
                .with_format(PayloadFormat::Bincode);
                let payload = match messages::encode(&HeartbeatPing { node_id: node.node_id() }) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "failed to encode heartbeat");
                        continue;
                    }
                };
                if let Err(e) = node.send_sync(client.as_ref(), meta, payload).await {
                    // The scheduler protocol re-registers on recovery; a
                    // missed heartbeat is not fatal here.
                    warn!(error = %e, "heartbeat failed");
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() || node.state().is_terminal() {
                    break;
                }
            }
        }
    }
    debug!(node_id = %node.node_id(), "heartbeat loop ended");
}

/// Reclaim tracker entries abandoned by timed-out or failed sends
async fn maintenance_loop(node: Arc<Node>) {
    let config = Arc::clone(node.config());
    let mut state_rx = node.subscribe_state();
    let mut ticker = tokio::time::interval(config.heartbeat.timeout);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Nothing legitimate waits longer than the cluster-available
                // timeout; older entries are leaks.
                let purged = node.tracker().purge_older_than(config.timeouts.cluster_available);
                if purged > 0 {
                    debug!(purged, "reclaimed stale tracker entries");
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() || node.state().is_terminal() {
                    break;
                }
            }
        }
    }
}
