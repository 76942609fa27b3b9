//! Latch Runtime Engine
//!
//! This crate contains the node layer of the Latch substrate, including:
//! - `Node`: the shared base with the sync/async send API and lifecycle
//! - `NodeRuntime`: orchestration of server, scheduler link, and loops
//! - Role strategies (worker, server, scheduler) and the scheduler registry
//! - Inbound dispatch for both directions of traffic
//!
//! This is the "engine" of a Latch process — `latch-core` provides the
//! stable wire and tracking primitives, `latch-tcp` moves the frames.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod builder;
pub mod dispatch;
pub mod messages;
pub mod node;
pub mod registry;
pub mod roles;
mod runtime;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use builder::NodeRuntimeBuilder;
pub use dispatch::{ClientReplyHandler, NodeDispatcher};
pub use node::Node;
pub use registry::{NodeRegistry, RegisteredNode};
pub use roles::{RoleStrategy, SchedulerStrategy, ServerStrategy, WorkerStrategy};
pub use runtime::NodeRuntime;

// Re-export core types for convenience
pub use latch_core::{
    ClusterState, Envelope, LatchConfig, LatchError, MessageCommand, MessageMeta, MessageTracker,
    NodeEvent, NodeId, NodeInfo, NodeRole, NodeState, PayloadFormat, Result, Transport,
};
pub use latch_tcp::{ServerHandler, TcpClient, TcpServer};
