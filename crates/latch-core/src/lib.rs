//! Latch Core Protocol Implementation
//!
//! This crate provides the foundational types for the Latch distributed node
//! coordination substrate: the wire envelope, node identity and lifecycle
//! state machines, the request tracker that correlates asynchronous sends
//! with counted responses, and the transport abstraction implemented by
//! `latch-tcp`.
//!
//! Payloads are opaque byte buffers end to end. The crate ships no opinion
//! about their contents; callers layer their own protocols on top.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod envelope;
pub mod errors;
pub mod lifecycle;
pub mod recovery;
pub mod tracker;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{
    ClusterConfig, HeartbeatConfig, LatchConfig, RecoveryConfig, SharedLatchConfig, StorageKind,
    TimeoutConfig, TransportConfig,
};
pub use envelope::{Envelope, MessageCommand, MessageMeta, PayloadFormat, WireFormat};
pub use errors::{
    EnvelopeError, LatchError, RecoveryError, Result, StateError, TransportError,
};
pub use lifecycle::{ClusterState, NodeEvent, NodeState};
pub use recovery::RecoveryStore;
pub use tracker::{MessageTracker, TrackerStatistics};
pub use transport::{ReceiveHandler, Transport};
pub use types::{NodeId, NodeInfo, NodeRole};
