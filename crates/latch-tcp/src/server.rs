//! TCP server side of the transport pair
//!
//! The server accepts connections from peer nodes and runs one task per
//! connection: read a frame, decode it, hand the envelope to the
//! [`ServerHandler`], and write back whatever reply the handler returns on
//! the same connection. Malformed envelopes drop the offending connection,
//! never the server.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use latch_core::{Envelope, TransportConfig, TransportError, WireFormat};

use crate::framing::{read_frame, write_frame};

// ----------------------------------------------------------------------------
// Server Handler
// ----------------------------------------------------------------------------

/// Inbound dispatch contract for a node's server
///
/// Invoked once per fully framed incoming envelope. Returning `Some`
/// writes the reply back on the connection the request arrived on.
#[async_trait]
pub trait ServerHandler: Send + Sync {
    async fn handle(&self, peer: SocketAddr, envelope: Envelope) -> Option<Envelope>;
}

// ----------------------------------------------------------------------------
// TCP Server
// ----------------------------------------------------------------------------

/// Listening half of a node: accepts peers and dispatches their envelopes
pub struct TcpServer {
    local_addr: SocketAddr,
    config: TransportConfig,
    listener: Option<TcpListener>,
    accept_handle: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl TcpServer {
    /// Bind the listening socket
    ///
    /// Binding to port 0 picks a free port; read it back from
    /// [`TcpServer::local_addr`].
    pub async fn bind(addr: &str, config: TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = watch::channel(false);
        info!(%local_addr, "server bound");
        Ok(Self {
            local_addr,
            config,
            listener: Some(listener),
            accept_handle: None,
            shutdown,
        })
    }

    /// Address the server is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the accept loop; each connection gets its own task
    ///
    /// Calling start twice is a no-op: the listener is consumed on the
    /// first call.
    pub fn start(&mut self, handler: Arc<dyn ServerHandler>) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        self.accept_handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            stream.set_nodelay(true).ok();
                            debug!(%peer, "accepted connection");
                            tokio::spawn(handle_connection(
                                stream,
                                peer,
                                Arc::clone(&handler),
                                config.clone(),
                                shutdown.subscribe(),
                            ));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }));
    }

    /// Stop accepting and wind down connection tasks
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.accept_handle.take() {
            handle.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Connection Task
// ----------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn ServerHandler>,
    config: TransportConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let frame = tokio::select! {
            _ = shutdown_rx.changed() => break,
            frame = read_frame(&mut reader, config.max_frame_size) => frame,
        };

        match frame {
            Ok(Some(bytes)) => {
                let envelope = match WireFormat::decode(&bytes) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(%peer, error = %e, "malformed envelope, dropping connection");
                        break;
                    }
                };
                if let Some(reply) = handler.handle(peer, envelope).await {
                    let encoded = match WireFormat::encode(&reply) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            warn!(%peer, error = %e, "failed to encode reply");
                            continue;
                        }
                    };
                    if let Err(e) = write_frame(&mut writer, &encoded, config.max_frame_size).await
                    {
                        warn!(%peer, error = %e, "failed to write reply, dropping connection");
                        break;
                    }
                }
            }
            Ok(None) => {
                debug!(%peer, "peer closed connection");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "read failed, dropping connection");
                break;
            }
        }
    }
}
