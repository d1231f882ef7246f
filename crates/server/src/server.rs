//! Upload WebSocket server.
//!
//! Listens on a TCP address, upgrades every accepted connection to
//! WebSocket and serves each one independently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chunkdrop_protocol::constants::WS_MAX_MESSAGE_SIZE;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection::{self, ClientConnection};
use crate::handler::Handler;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 9999;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
        }
    }
}

/// The upload server.
///
/// Dispatches every connection's requests to the shared [`Handler`].
pub struct UploadServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    connections: Mutex<Vec<ClientConnection>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl<H: Handler> UploadServer<H> {
    /// Creates a new server with the given handler.
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            connections: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`bind`](Self::bind).
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Number of currently open client connections.
    pub async fn connection_count(&self) -> usize {
        let mut conns = self.connections.lock().await;
        conns.retain(|c| !c.is_closed());
        conns.len()
    }

    /// Closes every client connection.
    pub async fn disconnect_all(&self) {
        for conn in self.connections.lock().await.drain(..) {
            conn.close();
        }
    }

    /// Gracefully shuts down the server and its connections.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Token cancelled on shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("upload server listening on {local_addr}");
        Ok(listener)
    }

    /// Binds and serves until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until shutdown.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    self.disconnect_all().await;
                    break Ok(());
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        };

        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Upgrades one TCP connection to WebSocket and starts its pumps.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        tracing::info!(%peer_addr, "WebSocket connection established");

        let conn = connection::spawn_connection(
            ws_stream,
            peer_addr,
            Arc::clone(&self.handler),
            self.cancel.clone(),
        );

        let mut conns = self.connections.lock().await;
        conns.retain(|c| !c.is_closed());
        conns.push(conn);
        Ok(())
    }
}
