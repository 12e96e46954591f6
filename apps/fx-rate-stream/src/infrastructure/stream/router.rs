//! Connection Router
//!
//! Maps connection identifiers to their bounded outbound queues. The
//! broadcast engine delivers through this router; only the session task
//! and its writer ever touch the socket itself.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::application::ports::{DeliveryError, DeliveryPort};
use crate::domain::streaming::OutboundFrame;
use crate::domain::subscription::ConnectionId;

/// Outbound routes for live connections.
#[derive(Debug, Default)]
pub struct ConnectionRouter {
    routes: RwLock<HashMap<ConnectionId, mpsc::Sender<OutboundFrame>>>,
}

impl ConnectionRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outbound queue of a connection, replacing any previous one.
    pub fn register(&self, connection: ConnectionId, sender: mpsc::Sender<OutboundFrame>) {
        self.routes.write().insert(connection, sender);
    }

    /// Remove a connection's route. Returns `true` if it was registered.
    pub fn unregister(&self, connection: ConnectionId) -> bool {
        self.routes.write().remove(&connection).is_some()
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

impl DeliveryPort for ConnectionRouter {
    fn deliver(&self, connection: ConnectionId, frame: OutboundFrame) -> Result<(), DeliveryError> {
        let routes = self.routes.read();
        let sender = routes
            .get(&connection)
            .ok_or(DeliveryError::Closed(connection))?;

        sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure(connection),
            TrySendError::Closed(_) => DeliveryError::Closed(connection),
        })
    }
}
