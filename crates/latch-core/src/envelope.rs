//! Message envelope and wire codec
//!
//! The envelope wraps an opaque payload with the metadata the substrate
//! needs to route and correlate it: a process-local request id, the command
//! tag, and the sender's role and rank. Payload bytes are forwarded
//! untouched in both directions.
//!
//! Wire form (big-endian):
//!
//! ```text
//! | version: u8 | meta_len: u16 | payload_len: u32 | checksum: u32 | meta | payload |
//! ```
//!
//! The checksum is CRC32 over `meta ++ payload`. The codec never panics on
//! malformed input; every failure maps to an [`EnvelopeError`].

use serde::{Deserialize, Serialize};

use crate::errors::EnvelopeError;
use crate::types::NodeRole;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Current wire format version
pub const WIRE_VERSION: u8 = 1;

/// Fixed header size: version + meta_len + payload_len + checksum
pub const HEADER_SIZE: usize = 1 + 2 + 4 + 4;

/// Maximum payload accepted by the codec
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

// ----------------------------------------------------------------------------
// Metadata
// ----------------------------------------------------------------------------

/// Command tag carried by every envelope
///
/// Tags only; the substrate never interprets the payload that travels with
/// them. Replies reuse the request's command tag and are recognized by
/// direction (they arrive on the client side of a connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCommand {
    /// Node announcing itself to the scheduler
    Register,
    /// Periodic liveness signal to the scheduler
    Heartbeat,
    /// Opaque data exchange between nodes
    SendData,
    /// Query the scheduler for registered peers
    FetchNodes,
    /// Graceful shutdown announcement
    Finish,
    /// Scheduler pushing cluster state to a node
    SyncState,
}

impl MessageCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCommand::Register => "Register",
            MessageCommand::Heartbeat => "Heartbeat",
            MessageCommand::SendData => "SendData",
            MessageCommand::FetchNodes => "FetchNodes",
            MessageCommand::Finish => "Finish",
            MessageCommand::SyncState => "SyncState",
        }
    }
}

/// Payload encoding tag, forwarded to collaborators untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    /// Raw bytes, meaning known only to the endpoints
    #[default]
    Raw,
    /// Payload is bincode-encoded
    Bincode,
    /// Payload is JSON text
    Json,
}

/// Routing and correlation metadata for one envelope
///
/// Created per outbound request and immutable once sent. The request id is
/// stamped by the send path from the node's monotonic counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Process-local monotonically increasing request id
    pub request_id: u64,
    /// Command tag
    pub command: MessageCommand,
    /// Role of the sending node
    pub role: NodeRole,
    /// Rank of the sending node within its role group
    pub rank_id: u32,
    /// Payload encoding tag
    pub format: PayloadFormat,
}

impl MessageMeta {
    /// Create metadata with an unstamped request id
    pub fn new(command: MessageCommand, role: NodeRole, rank_id: u32) -> Self {
        Self {
            request_id: 0,
            command,
            role,
            rank_id,
            format: PayloadFormat::Raw,
        }
    }

    /// Set the payload format tag
    pub fn with_format(mut self, format: PayloadFormat) -> Self {
        self.format = format;
        self
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// A framed message: metadata plus opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub meta: MessageMeta,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(meta: MessageMeta, payload: Vec<u8>) -> Self {
        Self { meta, payload }
    }

    /// Build the reply to this envelope: same command and request id, the
    /// responder's role and rank.
    pub fn reply(&self, role: NodeRole, rank_id: u32, payload: Vec<u8>) -> Envelope {
        let mut meta = MessageMeta::new(self.meta.command, role, rank_id);
        meta.request_id = self.meta.request_id;
        meta.format = self.meta.format;
        Envelope::new(meta, payload)
    }
}

// ----------------------------------------------------------------------------
// Wire Format Codec
// ----------------------------------------------------------------------------

/// Binary wire format encoder/decoder for [`Envelope`]
pub struct WireFormat;

impl WireFormat {
    /// Encode an envelope to its binary wire form
    pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
        if envelope.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(EnvelopeError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: envelope.payload.len(),
            });
        }

        let meta_bytes = bincode::serialize(&envelope.meta)?;
        if meta_bytes.len() > u16::MAX as usize {
            return Err(EnvelopeError::MetaTooLarge {
                max: u16::MAX as usize,
                actual: meta_bytes.len(),
            });
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&meta_bytes);
        hasher.update(&envelope.payload);
        let checksum = hasher.finalize();

        let mut bytes = Vec::with_capacity(HEADER_SIZE + meta_bytes.len() + envelope.payload.len());
        bytes.push(WIRE_VERSION);
        bytes.extend_from_slice(&(meta_bytes.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&(envelope.payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&checksum.to_be_bytes());
        bytes.extend_from_slice(&meta_bytes);
        bytes.extend_from_slice(&envelope.payload);
        Ok(bytes)
    }

    /// Decode an envelope from its binary wire form
    pub fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(EnvelopeError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let version = bytes[0];
        if version != WIRE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion { version });
        }

        let meta_len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        let payload_len = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]) as usize;
        let checksum = u32::from_be_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]);

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(EnvelopeError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: payload_len,
            });
        }

        let expected = HEADER_SIZE + meta_len + payload_len;
        if bytes.len() < expected {
            return Err(EnvelopeError::TooShort {
                expected,
                actual: bytes.len(),
            });
        }

        let meta_bytes = &bytes[HEADER_SIZE..HEADER_SIZE + meta_len];
        let payload = &bytes[HEADER_SIZE + meta_len..expected];

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(meta_bytes);
        hasher.update(payload);
        if hasher.finalize() != checksum {
            return Err(EnvelopeError::ChecksumFailed);
        }

        let meta: MessageMeta = bincode::deserialize(meta_bytes)?;
        Ok(Envelope::new(meta, payload.to_vec()))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
