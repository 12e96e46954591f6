//! Port Interfaces
//!
//! Defines the interfaces (ports) the application services depend on,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement these.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RateSource`: produces the next reference value for an instrument
//! - `DeliveryPort`: pushes a serialized frame to one live connection

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::instrument::InstrumentId;
use crate::domain::streaming::OutboundFrame;
use crate::domain::subscription::ConnectionId;

// =============================================================================
// Rate Source
// =============================================================================

/// Source of new reference values, called once per instrument per cycle.
///
/// The simulator perturbs the current value; a live deployment would read
/// from a market-data feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Produce the next value for `instrument` given its current value.
    ///
    /// # Errors
    ///
    /// Returns `RateSourceError` if no value can be produced.
    async fn next_value(
        &self,
        instrument: &InstrumentId,
        current: Option<Decimal>,
    ) -> Result<Option<Decimal>, RateSourceError>;
}

/// Rate source errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateSourceError {
    /// The upstream source is not available.
    #[error("rate source unavailable: {0}")]
    Unavailable(String),

    /// The source produced a value that cannot be represented.
    #[error("invalid value for {instrument}: {reason}")]
    InvalidValue {
        /// Instrument being priced.
        instrument: InstrumentId,
        /// Why the value was rejected.
        reason: String,
    },
}

// =============================================================================
// Delivery
// =============================================================================

/// Pushes outbound frames to individual connections.
///
/// Implementations must never block: a slow or vanished peer yields an
/// error instead.
pub trait DeliveryPort: Send + Sync {
    /// Queue `frame` for `connection`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the frame cannot be queued.
    fn deliver(&self, connection: ConnectionId, frame: OutboundFrame) -> Result<(), DeliveryError>;
}

/// Per-connection delivery failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection has no open outbound route.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The connection's outbound queue is full.
    #[error("outbound queue full for connection {0}")]
    Backpressure(ConnectionId),
}
