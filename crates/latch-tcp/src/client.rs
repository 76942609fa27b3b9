//! TCP client side of the transport pair
//!
//! One client owns one outbound connection to a peer node. Connecting
//! spawns a reader task that decodes inbound frames and hands each complete
//! envelope to the registered [`ReceiveHandler`]; sends go through the
//! writer half under a lock. A failed send or a dead reader marks the
//! client disconnected — the node layer's timeout path takes it from there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use latch_core::{Envelope, ReceiveHandler, Transport, TransportConfig, TransportError, WireFormat};

use crate::framing::{read_frame, write_frame};

// ----------------------------------------------------------------------------
// TCP Client
// ----------------------------------------------------------------------------

/// Outbound connection to one peer node
pub struct TcpClient {
    endpoint: String,
    config: TransportConfig,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    connected: Arc<AtomicBool>,
    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TcpClient {
    /// Create a client for the given `ip:port` endpoint; does not connect
    pub fn new<S: Into<String>>(endpoint: S, config: TransportConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            writer: tokio::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            reader_handle: std::sync::Mutex::new(None),
        }
    }

    /// Establish the connection within the configured timeout
    ///
    /// Spawns the reader task; `handler` is invoked once per fully framed
    /// inbound envelope until the connection drops.
    pub async fn connect(&self, handler: Arc<dyn ReceiveHandler>) -> Result<(), TransportError> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.endpoint),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            endpoint: self.endpoint.clone(),
            duration_ms: self.config.connect_timeout.as_millis() as u64,
        })?
        .map_err(|e| TransportError::ConnectionFailed {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        // Small control messages dominate this link; don't batch them.
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);

        let reader = self.spawn_reader(read_half, handler);
        if let Some(previous) = self.reader_handle.lock().unwrap().replace(reader) {
            previous.abort();
        }

        debug!(endpoint = %self.endpoint, "connected");
        Ok(())
    }

    /// Tear down the connection and stop the reader task
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_handle.lock().unwrap().take() {
            handle.abort();
        }
        *self.writer.lock().await = None;
        debug!(endpoint = %self.endpoint, "disconnected");
    }

    fn spawn_reader(
        &self,
        mut read_half: OwnedReadHalf,
        handler: Arc<dyn ReceiveHandler>,
    ) -> JoinHandle<()> {
        let endpoint = self.endpoint.clone();
        let max = self.config.max_frame_size;
        let connected = Arc::clone(&self.connected);

        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half, max).await {
                    Ok(Some(bytes)) => match WireFormat::decode(&bytes) {
                        Ok(envelope) => handler.on_message(envelope).await,
                        Err(e) => {
                            warn!(endpoint = %endpoint, error = %e, "malformed envelope, dropping connection");
                            break;
                        }
                    },
                    Ok(None) => {
                        info!(endpoint = %endpoint, "connection closed by peer");
                        break;
                    }
                    Err(e) => {
                        warn!(endpoint = %endpoint, error = %e, "read failed, dropping connection");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        })
    }

    /// Encode and send one envelope
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let frame = WireFormat::encode(envelope).map_err(|e| TransportError::ConnectionFailed {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        self.send(frame).await
    }
}

#[async_trait]
impl Transport for TcpClient {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| TransportError::NotConnected {
            endpoint: self.endpoint.clone(),
        })?;

        match write_frame(writer, &frame, self.config.max_frame_size).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // A half-written frame poisons the stream; drop it.
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
