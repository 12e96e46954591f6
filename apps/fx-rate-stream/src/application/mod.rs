//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (rate source, delivery).
pub mod ports;

/// Broadcast engine and session protocol handling.
pub mod services;
