//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `BroadcastEngine`: periodic tick generation and filtered fan-out
//! - `SessionHandler`: subscribe/unsubscribe protocol for one connection

/// Periodic tick generation and delivery.
pub mod broadcast;

/// Session protocol handling.
pub mod session;

pub use broadcast::{BroadcastEngine, BroadcastEngineConfig, CycleError, CycleReport, EngineStats};
pub use session::{ProtocolError, SessionHandler, SessionReply, SessionRequest};
