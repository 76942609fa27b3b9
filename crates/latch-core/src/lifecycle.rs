//! Node and Cluster Lifecycle State Machines
//!
//! Provides checked lifecycle transitions for a single node and the advisory
//! cluster-wide state broadcast by the scheduler. Node transitions are
//! monotonic: the only way backward is an explicit [`NodeEvent::Reset`]
//! issued by a recovery path.
//!
//! Repeated stop/finish requests are idempotent no-ops rather than errors,
//! so teardown code can be called from multiple paths without coordination.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::StateError;

// ----------------------------------------------------------------------------
// Node State
// ----------------------------------------------------------------------------

/// Local lifecycle state of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Constructed, registering with the cluster
    Starting,
    /// Registered and accepting work
    Ready,
    /// Graceful shutdown requested, draining
    Finishing,
    /// All shutdown acknowledgements collected
    Finished,
    /// Forced teardown without graceful finish semantics
    Stopped,
}

/// Events that drive node lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    /// Startup handshake completed; the node is ready for work
    StartCompleted,
    /// Graceful shutdown requested
    FinishRequested,
    /// All shutdown acknowledgements collected
    ShutdownAcked,
    /// Immediate teardown requested
    StopRequested,
    /// Recovery path restarting the node in place
    Reset,
}

impl NodeState {
    /// Current state name for logging and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Starting => "Starting",
            NodeState::Ready => "Ready",
            NodeState::Finishing => "Finishing",
            NodeState::Finished => "Finished",
            NodeState::Stopped => "Stopped",
        }
    }

    /// True once the node can never accept work again
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Finished | NodeState::Stopped)
    }

    /// Apply an event, producing the next state
    ///
    /// Idempotence rules: a stop request on an already-stopped node and a
    /// finish request on a finishing/finished node return the current state
    /// unchanged. Anything else outside the transition table is an
    /// [`StateError::InvalidTransition`].
    pub fn apply(self, event: NodeEvent) -> Result<NodeState, StateError> {
        use NodeEvent::*;
        use NodeState::*;

        let next = match (self, event) {
            (_, Reset) => Starting,

            (Starting, StartCompleted) => Ready,
            // Double start is harmless: the ready flag latches.
            (Ready, StartCompleted) => Ready,

            (Ready, FinishRequested) => Finishing,
            (Finishing, FinishRequested) => Finishing,
            (Finished, FinishRequested) => Finished,

            (Finishing, ShutdownAcked) => Finished,
            (Finished, ShutdownAcked) => Finished,

            (Starting, StopRequested) => Stopped,
            (Ready, StopRequested) => Stopped,
            (Finishing, StopRequested) => Stopped,
            // Teardown already happened, in either flavor.
            (Finished, StopRequested) => Finished,
            (Stopped, StopRequested) => Stopped,

            (from, event) => {
                return Err(StateError::InvalidTransition {
                    from: from.as_str(),
                    event: event.name(),
                })
            }
        };
        Ok(next)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NodeEvent {
    /// Event name for logging and errors
    pub fn name(&self) -> &'static str {
        match self {
            NodeEvent::StartCompleted => "StartCompleted",
            NodeEvent::FinishRequested => "FinishRequested",
            NodeEvent::ShutdownAcked => "ShutdownAcked",
            NodeEvent::StopRequested => "StopRequested",
            NodeEvent::Reset => "Reset",
        }
    }
}

// ----------------------------------------------------------------------------
// Cluster State
// ----------------------------------------------------------------------------

/// Advisory cluster-wide state broadcast by the scheduler
///
/// Received from the scheduler and cached locally. Nodes consult it for
/// local decisions (whether to accept new work), never for their own
/// lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    /// Nodes are still registering
    ClusterStarting,
    /// Every expected node has registered
    ClusterReady,
    /// Graceful cluster shutdown in progress
    ClusterFinishing,
    /// Every node has finished
    ClusterFinished,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::ClusterStarting => "ClusterStarting",
            ClusterState::ClusterReady => "ClusterReady",
            ClusterState::ClusterFinishing => "ClusterFinishing",
            ClusterState::ClusterFinished => "ClusterFinished",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
