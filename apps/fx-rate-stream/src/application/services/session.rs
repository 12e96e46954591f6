//! Session Protocol
//!
//! Interprets client control messages for one connection and produces the
//! immediate reply. Transport concerns (framing, queues, socket lifecycle)
//! stay in the stream server; this handler only sees text and returns a
//! reply.
//!
//! # Messages
//!
//! ```text
//! {"mode": "subscribe", "currencies": ["ZAR", "NGN"]}   -> catch-up rates
//! {"mode": "subscribe"}                                 -> whole catalog
//! {"mode": "unsubscribe", "currencies": ["ZAR"]}        -> {"status": "unsubscribed"}
//! {"mode": "unsubscribe"}                               -> clears everything
//! ```
//!
//! Any failure yields `{"error": "..."}` and leaves the connection's
//! subscriptions untouched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::instrument::{InstrumentId, RateBoard};
use crate::domain::streaming::{ErrorReply, OutboundFrame, RatesPayload, StatusReply, encode};
use crate::domain::subscription::{ConnectionId, SharedRegistry};
use crate::infrastructure::metrics;

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    currencies: Option<Vec<String>>,
}

/// A parsed control message.
///
/// `None` means "every instrument" for subscribe and "everything currently
/// subscribed" for unsubscribe. An empty list is a valid no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    /// Add instruments to the subscription set.
    Subscribe(Option<Vec<InstrumentId>>),
    /// Remove instruments from the subscription set.
    Unsubscribe(Option<Vec<InstrumentId>>),
}

impl SessionRequest {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the frame is not a JSON object with a
    /// recognized `mode` and a well-formed `currencies` list.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
        if !value.is_object() {
            return Err(ProtocolError::InvalidMessage(
                "expected a JSON object".to_string(),
            ));
        }

        let message: InboundMessage = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;

        let instruments = message
            .currencies
            .map(|codes| {
                codes
                    .iter()
                    .map(|code| {
                        InstrumentId::parse(code).ok_or_else(|| {
                            ProtocolError::InvalidMessage(
                                "currency codes must not be empty".to_string(),
                            )
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        match message.mode.as_deref() {
            Some("subscribe") => Ok(Self::Subscribe(instruments)),
            Some("unsubscribe") => Ok(Self::Unsubscribe(instruments)),
            _ => Err(ProtocolError::InvalidMode),
        }
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Immediate reply to one control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SessionReply {
    /// Catch-up view of the subscribed instruments.
    Rates(RatesPayload),
    /// Acknowledgment.
    Status(StatusReply),
    /// Rejected request.
    Error(ErrorReply),
}

impl SessionReply {
    /// Serialize the reply into a frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if serialization fails.
    pub fn encode(&self) -> Result<OutboundFrame, serde_json::Error> {
        encode(self)
    }

    /// Whether the request was rejected.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

// =============================================================================
// Session Handler
// =============================================================================

/// Protocol handler shared by every connection.
#[derive(Clone)]
pub struct SessionHandler {
    registry: SharedRegistry,
    board: Arc<RateBoard>,
}

impl SessionHandler {
    /// Create a handler over the shared registry and rate board.
    #[must_use]
    pub const fn new(registry: SharedRegistry, board: Arc<RateBoard>) -> Self {
        Self { registry, board }
    }

    /// Register a new connection with an empty subscription set.
    #[must_use]
    pub fn open(&self) -> ConnectionId {
        let id = self.registry.connect();
        let connections = self.registry.connection_count();
        metrics::set_active_connections(connections);
        tracing::info!(connection = %id, connections, "Client connected");
        id
    }

    /// Remove a connection and all of its subscriptions.
    pub fn close(&self, id: ConnectionId) {
        if self.registry.disconnect(id) {
            let connections = self.registry.connection_count();
            metrics::set_active_connections(connections);
            tracing::info!(connection = %id, connections, "Client disconnected");
        }
    }

    /// Handle a text frame.
    #[must_use]
    pub fn handle_text(&self, id: ConnectionId, text: &str) -> SessionReply {
        match SessionRequest::parse(text) {
            Ok(request) => self.apply(id, request),
            Err(e) => {
                tracing::debug!(connection = %id, error = %e, "Rejected control message");
                metrics::record_rejected_request();
                SessionReply::Error(ErrorReply::new(e.to_string()))
            }
        }
    }

    /// Handle a binary frame. Binary frames must carry UTF-8 JSON.
    #[must_use]
    pub fn handle_binary(&self, id: ConnectionId, data: &[u8]) -> SessionReply {
        std::str::from_utf8(data).map_or_else(
            |_| {
                metrics::record_rejected_request();
                SessionReply::Error(ErrorReply::new(ProtocolError::InvalidJson.to_string()))
            },
            |text| self.handle_text(id, text),
        )
    }

    fn apply(&self, id: ConnectionId, request: SessionRequest) -> SessionReply {
        match request {
            SessionRequest::Subscribe(instruments) => {
                match self.registry.subscribe(id, instruments.as_deref()) {
                    Ok(set) => {
                        tracing::debug!(connection = %id, subscribed = set.len(), "Subscribed");
                        SessionReply::Rates(RatesPayload::snapshot(
                            self.registry.catalog(),
                            &self.board,
                            &set,
                        ))
                    }
                    Err(e) => {
                        tracing::debug!(connection = %id, error = %e, "Subscribe rejected");
                        metrics::record_rejected_request();
                        SessionReply::Error(ErrorReply::new(e.to_string()))
                    }
                }
            }
            SessionRequest::Unsubscribe(instruments) => {
                match self.registry.unsubscribe(id, instruments.as_deref()) {
                    Ok(set) => {
                        tracing::debug!(connection = %id, subscribed = set.len(), "Unsubscribed");
                        SessionReply::Status(StatusReply::UNSUBSCRIBED)
                    }
                    Err(e) => {
                        metrics::record_rejected_request();
                        SessionReply::Error(ErrorReply::new(e.to_string()))
                    }
                }
            }
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Malformed control messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("Invalid JSON format")]
    InvalidJson,

    /// The JSON does not have the expected shape.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// `mode` is missing or not recognized.
    #[error("Invalid mode. Use 'subscribe' or 'unsubscribe'")]
    InvalidMode,
}

// =============================================================================
// Tests
// =============================================================================
