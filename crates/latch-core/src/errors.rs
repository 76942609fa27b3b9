//! Error types for the Latch substrate
//!
//! This module contains all error types used throughout Latch core, including
//! transport errors, envelope codec errors, lifecycle errors, and the main
//! LatchError type that unifies them all.
//!
//! Every fallible operation in the substrate reports failure through these
//! types; the only aborts left in the codebase are genuine programming errors
//! in test code.

use std::string::String;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Transport-layer failures (connection management and framed I/O)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
    #[error("Connect to {endpoint} timed out after {duration_ms}ms")]
    ConnectTimeout { endpoint: String, duration_ms: u64 },
    #[error("Not connected to {endpoint}")]
    NotConnected { endpoint: String },
    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Transport shut down: {reason}")]
    Shutdown { reason: String },
}

/// Envelope codec failures
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Buffer too short: need {expected} bytes, have {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Unsupported wire version {version}")]
    UnsupportedVersion { version: u8 },
    #[error("Payload of {actual} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { max: usize, actual: usize },
    #[error("Metadata of {actual} bytes exceeds limit of {max} bytes")]
    MetaTooLarge { max: usize, actual: usize },
    #[error("Checksum verification failed")]
    ChecksumFailed,
    #[error("Metadata serialization failed: {0}")]
    Meta(#[from] bincode::Error),
}

/// Lifecycle state machine violations
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid node state transition from {from} on {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },
}

/// Recovery store failures
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("Recovery storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Recovery storage parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Latch substrate
#[derive(Debug, thiserror::Error)]
pub enum LatchError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    /// A tracked request did not collect its expected responses in time
    #[error("Request {request_id} timed out after {duration_ms}ms")]
    ResponseTimeout { request_id: u64, duration_ms: u64 },

    /// The node did not reach the ready state in time
    #[error("Node start timed out after {duration_ms}ms")]
    StartTimeout { duration_ms: u64 },

    /// The node did not collect shutdown acknowledgements in time
    #[error("Node finish timed out after {duration_ms}ms")]
    FinishTimeout { duration_ms: u64 },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl LatchError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        LatchError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a transport connection failed error
    pub fn connection_failed<E: Into<String>, R: Into<String>>(endpoint: E, reason: R) -> Self {
        LatchError::Transport(TransportError::ConnectionFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        })
    }

    /// Create a response timeout error
    pub fn response_timeout(request_id: u64, duration: core::time::Duration) -> Self {
        LatchError::ResponseTimeout {
            request_id,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// True when the error is any of the timeout variants
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LatchError::ResponseTimeout { .. }
                | LatchError::StartTimeout { .. }
                | LatchError::FinishTimeout { .. }
                | LatchError::Transport(TransportError::ConnectTimeout { .. })
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, LatchError>;
