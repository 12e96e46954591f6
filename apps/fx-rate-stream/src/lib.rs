#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! FX Rate Stream - Live Reference Rate Fan-out
//!
//! A WebSocket service that pushes periodically updated foreign-exchange
//! reference rates to connected clients. Each client controls which
//! currencies it receives with subscribe/unsubscribe messages.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and registry logic
//!   - `instrument`: Currency catalog and the current rate board
//!   - `streaming`: Tick, rate view, error and status payloads
//!   - `subscription`: Per-connection subscription sets
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Rate source and delivery interfaces
//!   - `services`: Broadcast engine, session protocol handler
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: WebSocket server and connection router
//!   - `simulator`: Random-walk rate source
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                 ┌─────────────┐     ┌──────────────┐
//! RateSource ────►│  Broadcast  │────►│  Connection  │──► Client 1
//!                 │   Engine    │     │    Router    │──► Client 2
//!                 └──────┬──────┘     └──────▲───────┘──► Client N
//!                        │ subscribers       │ replies
//!                 ┌──────▼──────┐     ┌──────┴───────┐
//!                 │ Subscription│◄────│   Session    │◄── control messages
//!                 │  Registry   │     │   Handler    │
//!                 └─────────────┘     └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no transport dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instrument::{
    CatalogError, Instrument, InstrumentCatalog, InstrumentId, InstrumentMetadata, RateBoard,
};
pub use domain::streaming::{ErrorReply, OutboundFrame, RatesPayload, StatusReply, Tick};
pub use domain::subscription::{
    ConnectionId, RegistryError, RegistryStats, SharedRegistry, SubscriptionRegistry,
    SubscriptionSet,
};

// Ports
pub use application::ports::{DeliveryError, DeliveryPort, RateSource, RateSourceError};

// Services
pub use application::services::{
    BroadcastEngine, BroadcastEngineConfig, CycleError, CycleReport, EngineStats, ProtocolError,
    SessionHandler, SessionReply, SessionRequest,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ServerSettings, ServiceConfig, SessionSettings, TickSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Stream server (for integration tests)
pub use infrastructure::stream::{
    ConnectionRouter, STREAM_PATH, StreamServer, StreamServerError, StreamState, stream_router,
};

// Rate source
pub use infrastructure::simulator::SimulatedRateSource;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
