//! WebSocket transport: `/ws/{user_id}` handshake checks, the accept loop,
//! and one task per connected session.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use kanban_core::codec;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_MAX_CONNECTIONS;
use crate::session::{SessionCoordinator, SubmitError};

/// Path prefix of the session endpoint: `/ws/{user_id}`.
const SESSION_PATH_PREFIX: &str = "/ws/";

// ---------------------------------------------------------------------------
// Handshake checks
// ---------------------------------------------------------------------------

fn reject(status: http::StatusCode, body: &str) -> ErrorResponse {
    let mut resp = http::Response::new(Some(body.to_string()));
    *resp.status_mut() = status;
    resp
}

/// Extract the user id from `/ws/{user_id}`. Anything else is not a session
/// endpoint.
fn parse_session_path(path: &str) -> Option<&str> {
    let user_id = path.strip_prefix(SESSION_PATH_PREFIX)?;
    if user_id.is_empty() || user_id.contains('/') {
        return None;
    }
    Some(user_id)
}

/// Validate the `Origin` header on an incoming WebSocket upgrade request.
///
/// Allowed origins:
/// - `http(s)://localhost:*` or `http(s)://127.0.0.1:*` (local board UI)
/// - `null` (file:// contexts)
/// - Absent origin header (non-browser clients)
///
/// All other origins are rejected with HTTP 403.
fn validate_origin(req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    if let Some(origin) = req.headers().get("origin") {
        let origin_str = origin.to_str().unwrap_or("");
        let local = ["http://localhost", "https://localhost", "http://127.0.0.1", "https://127.0.0.1"]
            .iter()
            .any(|prefix| origin_str.starts_with(prefix));
        if origin_str == "null" || local {
            return Ok(resp);
        }
        tracing::warn!(origin = %origin_str, "ws: rejected connection from disallowed origin");
        return Err(reject(http::StatusCode::FORBIDDEN, "Origin not allowed"));
    }
    Ok(resp)
}

/// Route and origin check in one pass. On success the user id is returned
/// alongside the upgrade response.
fn check_handshake(req: &Request, resp: Response) -> Result<(String, Response), ErrorResponse> {
    let Some(user_id) = parse_session_path(req.uri().path()) else {
        tracing::debug!(path = %req.uri().path(), "ws: unknown path");
        return Err(reject(http::StatusCode::NOT_FOUND, "Not found"));
    };
    let user_id = user_id.to_string();
    validate_origin(req, resp).map(|resp| (user_id, resp))
}

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// WebSocket endpoint for board viewers.
///
/// Each connection on `/ws/{user_id}` becomes one session: it receives
/// `sync_state` first, then every broadcast frame, and may push commands.
pub struct WsServer {
    addr: SocketAddr,
    coordinator: Arc<SessionCoordinator>,
    cancel: CancellationToken,
    max_connections: usize,
}

impl WsServer {
    pub fn new(
        addr: SocketAddr,
        coordinator: Arc<SessionCoordinator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            coordinator,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Set the maximum number of concurrent WebSocket connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Run the WebSocket server: bind TCP, accept connections, and spawn
    /// per-client handlers until the cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, max_connections = self.max_connections, "ws server listening");
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "ws server bound");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                            let coordinator = Arc::clone(&self.coordinator);
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                let mut user_id = None;
                                let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                                    let (user, resp) = check_handshake(req, resp)?;
                                    user_id = Some(user);
                                    Ok(resp)
                                };
                                let handshake = tokio_tungstenite::accept_hdr_async(stream, callback).await;
                                match handshake {
                                    Ok(ws_stream) => {
                                        let user_id = user_id.unwrap_or_default();
                                        if let Err(e) = handle_ws_client(ws_stream, user_id, coordinator, cancel).await {
                                            tracing::debug!(peer = %peer, error = %e, "ws client handler finished with error");
                                        }
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-client handler
// ---------------------------------------------------------------------------

fn rejection_frame(err: &SubmitError) -> Option<String> {
    match codec::encode(&err.to_message()) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(error = %e, "ws: rejection could not be encoded");
            None
        }
    }
}

async fn handle_ws_client(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    user_id: String,
    coordinator: Arc<SessionCoordinator>,
    cancel: CancellationToken,
) -> Result<(), WsError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let mut session = coordinator.connect(user_id);
    let mut outbound = match coordinator.join(&mut session).await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(user = %session.user_id(), error = %e, "ws: join failed");
            coordinator.leave(&mut session);
            return ws_tx.send(Message::Close(None)).await;
        }
    };

    let result = loop {
        tokio::select! {
            // --- outbound frame from the hub ---
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!(user = %session.user_id(), "ws: dropped by hub, closing");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break Ok(());
                };
                if let Err(e) = ws_tx.send(Message::Text(frame.to_string())).await {
                    break Err(e);
                }
            }

            // --- incoming WebSocket message ---
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "ws read error, dropping client");
                        break Err(e);
                    }
                    None => {
                        tracing::debug!("ws client disconnected (stream ended)");
                        break Ok(());
                    }
                };

                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => {
                        tracing::debug!("ws client sent close frame");
                        break Ok(());
                    }
                    Message::Ping(data) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            break Err(e);
                        }
                        continue;
                    }
                    _ => continue,
                };

                if let Err(err) = coordinator.submit(&session, &text).await {
                    tracing::debug!(
                        user = %session.user_id(),
                        reason = ?err.reason(),
                        error = %err,
                        "ws: command rejected"
                    );
                    if let Some(frame) = rejection_frame(&err) {
                        if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                            break Err(e);
                        }
                    }
                }
            }

            _ = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break Ok(());
            }
        }
    };

    coordinator.leave(&mut session);
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
