//! Configuration Module
//!
//! Configuration loading for the rate stream service.

mod settings;

pub use settings::{ConfigError, ServerSettings, ServiceConfig, SessionSettings, TickSettings};
