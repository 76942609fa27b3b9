//! Role strategies
//!
//! The shared [`Node`](crate::node::Node) base carries the capability set —
//! start, stop, finish, synchronous and asynchronous send — and everything
//! role-specific is injected through a [`RoleStrategy`] object rather than
//! subclassing. Workers and servers answer data traffic; the scheduler
//! answers the cluster control plane out of its [`NodeRegistry`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use latch_core::{
    ClusterState, Envelope, LatchError, MessageCommand, NodeRole, SharedLatchConfig,
};

use crate::messages::{
    self, FinishNotice, HeartbeatAck, HeartbeatPing, NodeListSnapshot, RegisterAck,
    RegisterRequest,
};
use crate::node::Node;
use crate::registry::NodeRegistry;

// ----------------------------------------------------------------------------
// Role Strategy Trait
// ----------------------------------------------------------------------------

/// Role-specific behavior plugged into the shared node base
#[async_trait]
pub trait RoleStrategy: Send + Sync {
    /// Role this strategy implements
    fn role(&self) -> NodeRole;

    /// Hook run after the node's server is bound, before registration
    async fn on_start(&self, _node: &Arc<Node>) -> Result<(), LatchError> {
        Ok(())
    }

    /// Handle one inbound request; a returned envelope is written back on
    /// the connection the request arrived on
    async fn on_message(
        &self,
        node: &Arc<Node>,
        peer: SocketAddr,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, LatchError>;
}

// ----------------------------------------------------------------------------
// Worker / Server
// ----------------------------------------------------------------------------

/// Acknowledges data traffic addressed to a worker
pub struct WorkerStrategy;

/// Acknowledges data traffic addressed to a server
pub struct ServerStrategy;

async fn data_plane_message(
    node: &Arc<Node>,
    peer: SocketAddr,
    envelope: Envelope,
) -> Result<Option<Envelope>, LatchError> {
    match envelope.meta.command {
        // Payload is opaque to the substrate; acknowledge receipt so the
        // sender's tracker is satisfied. Consumers layer their own handling
        // on top of the peer list and payload format tag.
        MessageCommand::SendData => {
            debug!(
                %peer,
                request_id = envelope.meta.request_id,
                bytes = envelope.payload.len(),
                "data message received"
            );
            Ok(Some(envelope.reply(node.role(), node.rank_id(), Vec::new())))
        }
        other => {
            warn!(%peer, command = other.as_str(), "unexpected command on data plane");
            Ok(None)
        }
    }
}

#[async_trait]
impl RoleStrategy for WorkerStrategy {
    fn role(&self) -> NodeRole {
        NodeRole::Worker
    }

    async fn on_message(
        &self,
        node: &Arc<Node>,
        peer: SocketAddr,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, LatchError> {
        data_plane_message(node, peer, envelope).await
    }
}

#[async_trait]
impl RoleStrategy for ServerStrategy {
    fn role(&self) -> NodeRole {
        NodeRole::Server
    }

    async fn on_message(
        &self,
        node: &Arc<Node>,
        peer: SocketAddr,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, LatchError> {
        data_plane_message(node, peer, envelope).await
    }
}

// ----------------------------------------------------------------------------
// Scheduler
// ----------------------------------------------------------------------------

/// Answers the cluster control plane: registration, heartbeats, node
/// lookups, and finish accounting
pub struct SchedulerStrategy {
    registry: Arc<NodeRegistry>,
    config: SharedLatchConfig,
}

impl SchedulerStrategy {
    pub fn new(registry: Arc<NodeRegistry>, config: SharedLatchConfig) -> Self {
        Self { registry, config }
    }

    fn expected_nodes(&self) -> usize {
        self.config.cluster.expected_nodes() as usize
    }

    fn handle_register(&self, node: &Arc<Node>, envelope: &Envelope) -> Result<Envelope, LatchError> {
        let request: RegisterRequest = messages::decode(&envelope.payload)?;
        let rank_id = self.registry.register(request.info);

        if self.registry.registered_count() >= self.expected_nodes()
            && node.cluster_state() == ClusterState::ClusterStarting
        {
            info!(nodes = self.registry.registered_count(), "every expected node registered");
            node.set_cluster_state(ClusterState::ClusterReady);
        }

        let ack = RegisterAck {
            rank_id,
            cluster_state: node.cluster_state(),
        };
        Ok(envelope.reply(node.role(), node.rank_id(), messages::encode(&ack)?))
    }

    fn handle_heartbeat(&self, node: &Arc<Node>, envelope: &Envelope) -> Result<Envelope, LatchError> {
        let ping: HeartbeatPing = messages::decode(&envelope.payload)?;
        self.registry.heartbeat(&ping.node_id);
        let ack = HeartbeatAck {
            cluster_state: node.cluster_state(),
        };
        Ok(envelope.reply(node.role(), node.rank_id(), messages::encode(&ack)?))
    }

    fn handle_fetch_nodes(&self, node: &Arc<Node>, envelope: &Envelope) -> Result<Envelope, LatchError> {
        let snapshot = NodeListSnapshot {
            nodes: self.registry.snapshot().to_vec(),
        };
        Ok(envelope.reply(node.role(), node.rank_id(), messages::encode(&snapshot)?))
    }

    fn handle_finish(&self, node: &Arc<Node>, envelope: &Envelope) -> Result<Envelope, LatchError> {
        let notice: FinishNotice = messages::decode(&envelope.payload)?;
        let finished = self.registry.mark_finished(&notice.node_id);

        if node.cluster_state() == ClusterState::ClusterReady {
            node.set_cluster_state(ClusterState::ClusterFinishing);
        }
        if finished >= self.expected_nodes() {
            info!(finished, "every expected node finished");
            node.set_cluster_state(ClusterState::ClusterFinished);
        }

        Ok(envelope.reply(node.role(), node.rank_id(), Vec::new()))
    }
}

#[async_trait]
impl RoleStrategy for SchedulerStrategy {
    fn role(&self) -> NodeRole {
        NodeRole::Scheduler
    }

    async fn on_message(
        &self,
        node: &Arc<Node>,
        peer: SocketAddr,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, LatchError> {
        let reply = match envelope.meta.command {
            MessageCommand::Register => self.handle_register(node, &envelope)?,
            MessageCommand::Heartbeat => self.handle_heartbeat(node, &envelope)?,
            MessageCommand::FetchNodes => self.handle_fetch_nodes(node, &envelope)?,
            MessageCommand::Finish => self.handle_finish(node, &envelope)?,
            other => {
                warn!(%peer, command = other.as_str(), "unexpected command on control plane");
                return Ok(None);
            }
        };
        Ok(Some(reply))
    }
}
