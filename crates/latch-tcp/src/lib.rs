//! Latch TCP Transport
//!
//! The concrete transport pair for the Latch substrate: a framed
//! [`TcpClient`] implementing `latch_core::Transport` for outbound
//! connections, and a [`TcpServer`] that accepts peers and dispatches their
//! envelopes to a [`ServerHandler`].
//!
//! Framing is a 4-byte big-endian length prefix; a send either transmits
//! the whole frame or fails, and the receive path only ever surfaces
//! complete frames.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod client;
pub mod framing;
pub mod server;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use client::TcpClient;
pub use server::{ServerHandler, TcpServer};
