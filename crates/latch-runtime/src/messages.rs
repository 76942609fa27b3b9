//! Control-plane payloads exchanged between nodes and the scheduler
//!
//! These ride inside envelopes as bincode payloads. They are a concern of
//! the runtime's calling protocol, not of the substrate: the envelope and
//! transport layers below never look at them.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use latch_core::{ClusterState, EnvelopeError, LatchError, NodeId, NodeInfo};

// ----------------------------------------------------------------------------
// Payload Types
// ----------------------------------------------------------------------------

/// Worker/server announcing itself to the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub info: NodeInfo,
}

/// Scheduler's answer to a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAck {
    /// Rank assigned within the node's role group
    pub rank_id: u32,
    pub cluster_state: ClusterState,
}

/// Periodic liveness signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPing {
    pub node_id: NodeId,
}

/// Scheduler's answer to a heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub cluster_state: ClusterState,
}

/// Scheduler pushing cluster state to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSync {
    pub cluster_state: ClusterState,
}

/// Node announcing its graceful shutdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishNotice {
    pub node_id: NodeId,
}

/// Scheduler's answer to a FetchNodes query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeListSnapshot {
    pub nodes: Vec<NodeInfo>,
}

// ----------------------------------------------------------------------------
// Codec Helpers
// ----------------------------------------------------------------------------

/// Encode a control payload to bytes
pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, LatchError> {
    bincode::serialize(payload)
        .map_err(|e| LatchError::Envelope(EnvelopeError::Meta(e)))
}

/// Decode a control payload from bytes
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LatchError> {
    bincode::deserialize(bytes)
        .map_err(|e| LatchError::Envelope(EnvelopeError::Meta(e)))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
