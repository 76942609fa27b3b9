//! Transport abstraction for the Latch substrate
//!
//! A transport moves fully framed byte buffers between nodes. Either a
//! frame is transmitted whole or the send fails; the receive side delivers
//! only complete frames. The node layer treats any transport failure as
//! "the response never arrives" and relies on the timeout path, so
//! implementations report errors and move on rather than retrying.

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::errors::TransportError;

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Outbound half of a connection to one peer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transmit one complete frame
    ///
    /// Returns only after the buffer is fully handed to the OS, or fails
    /// without partial delivery.
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Whether the connection is currently established
    fn is_connected(&self) -> bool;

    /// Peer address for logging and error context
    fn endpoint(&self) -> String;
}

// ----------------------------------------------------------------------------
// Receive Handler
// ----------------------------------------------------------------------------

/// Callback invoked once per fully framed incoming message
#[async_trait]
pub trait ReceiveHandler: Send + Sync {
    async fn on_message(&self, envelope: Envelope);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
