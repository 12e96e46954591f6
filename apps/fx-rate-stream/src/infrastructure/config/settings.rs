//! Service Configuration Settings
//!
//! Configuration types for the rate stream, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Largest accepted volatility, exclusive (100 %).
const MAX_VOLATILITY_BPS: u32 = 10_000;

/// Largest accepted rate precision in decimal places.
const MAX_RATE_PRECISION: u32 = 12;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket stream port.
    pub stream_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            stream_port: 8000,
            health_port: 8082,
        }
    }
}

/// Tick generation settings.
#[derive(Debug, Clone)]
pub struct TickSettings {
    /// Time between broadcast cycles.
    pub interval: Duration,
    /// Maximum relative move per tick, in basis points.
    pub volatility_bps: u32,
    /// Decimal places kept on simulated values.
    pub precision: u32,
}

impl Default for TickSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            volatility_bps: 50,
            precision: 6,
        }
    }
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bounded outbound queue capacity per connection.
    pub queue_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Tick generation settings.
    pub tick: TickSettings,
    /// Per-session settings.
    pub session: SessionSettings,
    /// Catalog file; the bundled catalog is used when unset.
    pub catalog_path: Option<PathBuf>,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable or
    /// out-of-range value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is unparseable or out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = ServerSettings {
            stream_port: parse_value(&lookup, "FX_STREAM_PORT", ServerSettings::default().stream_port)?,
            health_port: parse_value(&lookup, "FX_HEALTH_PORT", ServerSettings::default().health_port)?,
        };

        let tick = TickSettings {
            interval: parse_duration_secs(
                &lookup,
                "FX_TICK_INTERVAL_SECS",
                TickSettings::default().interval,
            )?,
            volatility_bps: parse_value(
                &lookup,
                "FX_TICK_VOLATILITY_BPS",
                TickSettings::default().volatility_bps,
            )?,
            precision: parse_value(&lookup, "FX_RATE_PRECISION", TickSettings::default().precision)?,
        };

        let session = SessionSettings {
            queue_capacity: parse_value(
                &lookup,
                "FX_SESSION_QUEUE_CAPACITY",
                SessionSettings::default().queue_capacity,
            )?,
        };

        let catalog_path = lookup("FX_CATALOG_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let config = Self {
            server,
            tick,
            session,
            catalog_path,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "FX_TICK_INTERVAL_SECS".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.tick.volatility_bps >= MAX_VOLATILITY_BPS {
            return Err(ConfigError::InvalidValue {
                key: "FX_TICK_VOLATILITY_BPS".to_string(),
                reason: format!("must be below {MAX_VOLATILITY_BPS}"),
            });
        }
        if self.tick.precision > MAX_RATE_PRECISION {
            return Err(ConfigError::InvalidValue {
                key: "FX_RATE_PRECISION".to_string(),
                reason: format!("must be at most {MAX_RATE_PRECISION}"),
            });
        }
        if self.session.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FX_SESSION_QUEUE_CAPACITY".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has a value that cannot be used.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_value<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("cannot parse {raw:?}"),
        }),
    }
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_value(lookup, key, default.as_secs()).map(Duration::from_secs)
}
