//! Core identity types for the Latch substrate
//!
//! This module defines node identity: the role a node plays in the cluster,
//! its cluster-unique string id, and the rank/address record assigned to it
//! by the scheduler during registration.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Node Role
// ----------------------------------------------------------------------------

/// Role a node plays in the cluster protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Issues work requests and consumes parameters
    Worker,
    /// Holds parameter shards and answers worker requests
    Server,
    /// Assigns ranks and broadcasts cluster state
    Scheduler,
}

impl NodeRole {
    /// Stable name for logging and wire-adjacent diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Worker => "worker",
            NodeRole::Server => "server",
            NodeRole::Scheduler => "scheduler",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for NodeRole {
    type Err = crate::LatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worker" => Ok(NodeRole::Worker),
            "server" => Ok(NodeRole::Server),
            "scheduler" => Ok(NodeRole::Scheduler),
            other => Err(crate::LatchError::config_error(format!(
                "Unknown node role: {other}"
            ))),
        }
    }
}

// ----------------------------------------------------------------------------
// Node Identifier
// ----------------------------------------------------------------------------

/// Cluster-unique identifier for a node
///
/// Assigned by the process that launches the node (typically a generated
/// string); the scheduler keys its registry on this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new node id from any string-like value
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ----------------------------------------------------------------------------
// Node Info
// ----------------------------------------------------------------------------

/// Identity record for a node
///
/// The id, role, and bound address are fixed at construction; the rank id is
/// assigned exactly once by the scheduler during registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Cluster-unique node id
    pub node_id: NodeId,
    /// Rank within the node's role group, assigned by the scheduler
    pub rank_id: u32,
    /// Role this node plays
    pub role: NodeRole,
    /// IP address the node's server is bound to
    pub ip: String,
    /// Port the node's server is bound to
    pub port: u16,
}

impl NodeInfo {
    /// Create a node info record with an unassigned rank
    pub fn new<S: Into<String>>(node_id: NodeId, role: NodeRole, ip: S, port: u16) -> Self {
        Self {
            node_id,
            rank_id: 0,
            role,
            ip: ip.into(),
            port,
        }
    }

    /// `ip:port` form used for connecting and logging
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}:{}]@{}",
            self.node_id,
            self.role,
            self.rank_id,
            self.endpoint()
        )
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [NodeRole::Worker, NodeRole::Server, NodeRole::Scheduler] {
            let parsed: NodeRole = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("driver".parse::<NodeRole>().is_err());
    }

    #[test]
    fn test_node_info_endpoint() {
        let info = NodeInfo::new(NodeId::new("w-0"), NodeRole::Worker, "127.0.0.1", 9550);
        assert_eq!(info.endpoint(), "127.0.0.1:9550");
        assert_eq!(info.rank_id, 0);
        assert_eq!(format!("{info}"), "w-0[worker:0]@127.0.0.1:9550");
    }
}
