//! WebSocket Stream Server
//!
//! Serves `GET /v1/fx/stream`. Each upgraded socket becomes one session:
//!
//! 1. Register with the registry and the connection router
//! 2. Spawn a writer task draining the bounded outbound queue into the socket
//! 3. Read control messages and enqueue the replies on the same queue
//! 4. On any exit, a guard unregisters the route and disconnects exactly once

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::router::ConnectionRouter;
use crate::application::services::{SessionHandler, SessionReply};
use crate::domain::streaming::OutboundFrame;
use crate::domain::subscription::ConnectionId;

/// Stream endpoint path.
pub const STREAM_PATH: &str = "/v1/fx/stream";

/// Time the writer gets to flush queued frames after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// State
// =============================================================================

/// Shared state for stream sessions.
pub struct StreamState {
    handler: SessionHandler,
    router: Arc<ConnectionRouter>,
    queue_capacity: usize,
    cancel: CancellationToken,
}

impl StreamState {
    /// Create new stream state.
    #[must_use]
    pub const fn new(
        handler: SessionHandler,
        router: Arc<ConnectionRouter>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handler,
            router,
            queue_capacity,
            cancel,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// WebSocket stream server.
pub struct StreamServer {
    port: u16,
    state: Arc<StreamState>,
    cancel: CancellationToken,
}

impl StreamServer {
    /// Create a new stream server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<StreamState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the stream server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StreamServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), StreamServerError> {
        let app = stream_router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StreamServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, path = STREAM_PATH, "Stream server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| StreamServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Stream server stopped");
        Ok(())
    }
}

/// Build the stream router.
pub fn stream_router(state: Arc<StreamState>) -> Router {
    Router::new()
        .route(STREAM_PATH, get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<StreamState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// =============================================================================
// Session
// =============================================================================

/// Unregisters the route and disconnects from the registry when dropped.
struct SessionGuard {
    connection: ConnectionId,
    handler: SessionHandler,
    router: Arc<ConnectionRouter>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.router.unregister(self.connection);
        self.handler.close(self.connection);
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<StreamState>) {
    let connection = state.handler.open();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(state.queue_capacity);
    state.router.register(connection, tx.clone());

    let guard = SessionGuard {
        connection,
        handler: state.handler.clone(),
        router: Arc::clone(&state.router),
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(frame.to_string().into())).await {
                tracing::debug!(%connection, error = %e, "WebSocket send failed");
                break;
            }
        }
        if let Err(e) = ws_sender.close().await {
            tracing::debug!(%connection, error = %e, "WebSocket close failed");
        }
    });
    let writer_abort = writer.abort_handle();

    loop {
        let message = tokio::select! {
            biased;
            () = state.cancel.cancelled() => break,
            message = ws_receiver.next() => message,
        };

        let reply = match message {
            Some(Ok(Message::Text(text))) => state.handler.handle_text(connection, text.as_str()),
            Some(Ok(Message::Binary(data))) => state.handler.handle_binary(connection, &data),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(%connection, error = %e, "WebSocket receive failed");
                break;
            }
        };

        if !enqueue_reply(connection, &tx, &reply, &state.cancel).await {
            break;
        }
    }

    // Stop routing ticks before the queue closes
    drop(guard);
    drop(tx);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        writer_abort.abort();
    }
}

/// Queue a reply behind any pending ticks. Returns `false` if the session
/// should end.
async fn enqueue_reply(
    connection: ConnectionId,
    tx: &mpsc::Sender<OutboundFrame>,
    reply: &SessionReply,
    cancel: &CancellationToken,
) -> bool {
    let frame = match reply.encode() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(%connection, error = %e, "Failed to encode reply");
            return true;
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(frame) => sent.is_ok(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Stream server errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
