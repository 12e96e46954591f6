//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Random-walk rate source.
pub mod simulator;

/// WebSocket streaming transport.
pub mod stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;
