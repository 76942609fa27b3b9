//! Inbound message dispatch
//!
//! Two dispatchers cover the two directions of traffic:
//!
//! - [`NodeDispatcher`] sits behind the node's TCP server and routes
//!   inbound *requests*: substrate-level commands are handled here, the
//!   rest goes to the role strategy.
//! - [`ClientReplyHandler`] sits behind each outbound TCP client and
//!   absorbs *replies*: it caches whatever control state the reply carries,
//!   then reports the arrival to the request tracker so blocked senders
//!   wake up.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use latch_core::{Envelope, MessageCommand, ReceiveHandler};
use latch_tcp::ServerHandler;

use crate::messages::{self, HeartbeatAck, NodeListSnapshot, RegisterAck, StateSync};
use crate::node::Node;
use crate::roles::RoleStrategy;

// ----------------------------------------------------------------------------
// Server-Side Dispatcher
// ----------------------------------------------------------------------------

/// Routes requests arriving at this node's server
pub struct NodeDispatcher {
    node: Arc<Node>,
    strategy: Arc<dyn RoleStrategy>,
}

impl NodeDispatcher {
    pub fn new(node: Arc<Node>, strategy: Arc<dyn RoleStrategy>) -> Self {
        Self { node, strategy }
    }
}

#[async_trait]
impl ServerHandler for NodeDispatcher {
    async fn handle(&self, peer: SocketAddr, envelope: Envelope) -> Option<Envelope> {
        match envelope.meta.command {
            // Cluster state pushed by the scheduler: cache and acknowledge.
            MessageCommand::SyncState => {
                match messages::decode::<StateSync>(&envelope.payload) {
                    Ok(sync) => self.node.set_cluster_state(sync.cluster_state),
                    Err(e) => {
                        warn!(%peer, error = %e, "undecodable state sync payload");
                    }
                }
                Some(envelope.reply(self.node.role(), self.node.rank_id(), Vec::new()))
            }
            _ => match self.strategy.on_message(&self.node, peer, envelope).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(%peer, error = %e, "role strategy failed to handle message");
                    None
                }
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Client-Side Reply Handler
// ----------------------------------------------------------------------------

/// Absorbs replies arriving on an outbound connection
///
/// Control payloads are cached onto the node before the arrival is
/// reported, so a caller woken by `send_sync` always observes the state
/// its reply carried.
pub struct ClientReplyHandler {
    node: Arc<Node>,
}

impl ClientReplyHandler {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl ReceiveHandler for ClientReplyHandler {
    async fn on_message(&self, envelope: Envelope) {
        if !envelope.payload.is_empty() {
            match envelope.meta.command {
                MessageCommand::Register => {
                    match messages::decode::<RegisterAck>(&envelope.payload) {
                        Ok(ack) => {
                            self.node.assign_rank(ack.rank_id);
                            self.node.set_cluster_state(ack.cluster_state);
                        }
                        Err(e) => warn!(error = %e, "undecodable register ack"),
                    }
                }
                MessageCommand::Heartbeat => {
                    match messages::decode::<HeartbeatAck>(&envelope.payload) {
                        Ok(ack) => self.node.set_cluster_state(ack.cluster_state),
                        Err(e) => warn!(error = %e, "undecodable heartbeat ack"),
                    }
                }
                MessageCommand::FetchNodes => {
                    match messages::decode::<NodeListSnapshot>(&envelope.payload) {
                        Ok(snapshot) => self.node.set_peers(snapshot.nodes),
                        Err(e) => warn!(error = %e, "undecodable node list"),
                    }
                }
                MessageCommand::SyncState => {
                    match messages::decode::<StateSync>(&envelope.payload) {
                        Ok(sync) => self.node.set_cluster_state(sync.cluster_state),
                        Err(e) => warn!(error = %e, "undecodable state sync"),
                    }
                }
                // Opaque or empty acknowledgements: nothing to cache.
                MessageCommand::SendData | MessageCommand::Finish => {}
            }
        }

        // Count the arrival last; waiters woken here must see cached state.
        self.node.notify_arrival(&envelope.meta);
    }
}
