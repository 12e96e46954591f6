//! Domain Layer - Core rate streaming types and business logic.
//!
//! This layer contains the instrument catalog, the payloads pushed to
//! clients, and the subscription registry. Nothing here touches the
//! network or the clock beyond timestamping ticks.

/// Instrument catalog and current rate board.
pub mod instrument;

/// Tick and reply payloads.
pub mod streaming;

/// Subscription registry.
pub mod subscription;
