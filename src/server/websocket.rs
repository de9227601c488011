//! WebSocket server implementation
//!
//! Listens for window connections. Each connection gets its own window id, a
//! reader loop handling inbound envelopes in order and a writer task draining
//! the window's outbound queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::handler::{Backend, ConnectionHandler, HandleOutcome};
use super::protocol::Envelope;
use crate::config::BackendConfig;

/// How long queued messages may take to flush after a window goes away
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on, 0 for any free port
    pub port: u16,
    /// Optional authentication token
    pub token: Option<String>,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            token: None,
        }
    }

    /// Set the authentication token
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl From<&BackendConfig> for ServerConfig {
    fn from(config: &BackendConfig) -> Self {
        Self::new(config.bind.clone(), config.port).with_token(config.token.clone())
    }
}

/// WebSocket server for window connections
pub struct WebSocketServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    token: Option<String>,
    backend: Arc<Backend>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Bind the listening socket
    pub async fn bind(config: ServerConfig, backend: Arc<Backend>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.socket_addr()).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            listener,
            local_addr,
            token: config.token,
            backend,
            shutdown_tx,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// State shared by all connections
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the WebSocket server
    ///
    /// Accepts connections until shutdown is triggered, then closes every
    /// connection and destroys all sessions.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("WebSocket server listening on ws://{}/ws", self.local_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let backend = Arc::clone(&self.backend);
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            let token = self.token.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, backend, shutdown_rx, token).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let manager = self.backend.manager();
        if let Ok(sessions) = manager.list_sessions().await {
            if !sessions.is_empty() {
                info!("Closing {} active sessions...", sessions.len());
            }
        }
        if let Err(e) = manager.shutdown().await {
            warn!("Session manager already stopped: {}", e);
        }
        Ok(())
    }
}

/// Whether the query string carries `token=<expected>`
fn token_matches(query: Option<&str>, expected: &str) -> bool {
    query
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| key == "token" && value == expected)
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    backend: Arc<Backend>,
    mut shutdown_rx: broadcast::Receiver<()>,
    token: Option<String>,
) -> anyhow::Result<()> {
    debug!("New connection from {}", peer_addr);

    let authorize = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match &token {
            Some(expected) if !token_matches(request.uri().query(), expected) => {
                warn!("Rejected connection from {}: invalid token", peer_addr);
                let mut rejection = ErrorResponse::new(Some("invalid token".to_string()));
                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                Err(rejection)
            }
            _ => Ok(response),
        }
    };
    let ws_stream = accept_hdr_async(stream, authorize).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
    let mut handler = ConnectionHandler::new(backend, outbound_tx);
    let window = handler.window();
    info!(window, %peer_addr, "Window connected");

    let mut writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let json = match envelope.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!(window, "Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if handler.handle_text(&text).await == HandleOutcome::Close {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!(window, "Received binary message ({} bytes), ignoring", data.len());
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(window, "Window sent close frame");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        warn!(window, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(window, "Shutdown signal received, closing connection");
                break;
            }
        }
    }

    // Cascade to everything the window owns, then let queued messages flush
    handler.close().await;
    drop(handler);
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(window, %peer_addr, "Window disconnected");
    Ok(())
}
