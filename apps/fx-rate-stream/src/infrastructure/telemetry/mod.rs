//! OpenTelemetry Tracing Integration
//!
//! Configures the `tracing` subscriber and, optionally, an OTLP exporter
//! for distributed tracing.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Full filter directives (takes precedence)
//! - `LOG_LEVEL`: Plain level used when `RUST_LOG` is unset (default: info)
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: fx-rate-stream)
//!
//! # Usage
//!
//! ```ignore
//! use fx_rate_stream::infrastructure::telemetry;
//!
//! // Initialize at startup (returns guard that must be kept alive)
//! let _guard = telemetry::init();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "fx-rate-stream";

/// Default OTLP endpoint (gRPC).
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Level used when neither `RUST_LOG` nor `LOG_LEVEL` is set.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether OpenTelemetry export is enabled.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
    /// Filter directives from `RUST_LOG`.
    pub rust_log: Option<String>,
    /// Plain level from `LOG_LEVEL`.
    pub log_level: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            rust_log: None,
            log_level: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let enabled = std::env::var("OTEL_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
            rust_log: std::env::var("RUST_LOG").ok(),
            log_level: std::env::var("LOG_LEVEL").ok(),
        }
    }

    /// Build the log filter.
    ///
    /// `RUST_LOG` wins; otherwise `LOG_LEVEL` applies to everything. Noisy
    /// HTTP internals are capped at `warn` either way.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn env_filter(&self) -> EnvFilter {
        let base = self
            .rust_log
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .and_then(|v| EnvFilter::try_new(v).ok())
            .or_else(|| {
                self.log_level
                    .as_deref()
                    .map(|v| v.trim().to_lowercase())
                    .and_then(|v| EnvFilter::try_new(v).ok())
            })
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL));

        base.add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        )
        .add_directive(
            "h2=warn"
                .parse()
                .expect("static directive 'h2=warn' is valid"),
        )
    }
}

/// Initialize telemetry with default configuration from environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
/// When the guard is dropped, OpenTelemetry will be properly shut down.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// Falls back to console-only logging if the OTLP exporter cannot be built.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = config.env_filter();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let otlp_exporter = if config.enabled {
        match opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
        {
            Ok(exporter) => Some(exporter),
            Err(e) => {
                eprintln!("Failed to create OTLP exporter, tracing to console only: {e}");
                None
            }
        }
    } else {
        None
    };

    let Some(otlp_exporter) = otlp_exporter else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();

        return TelemetryGuard {
            tracer_provider: None,
        };
    };

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name);
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
        assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn filter_defaults_to_info() {
        let filter = TelemetryConfig::default().env_filter().to_string();
        assert!(filter.contains("info"), "{filter}");
        assert!(filter.contains("hyper=warn"), "{filter}");
    }

    #[test]
    fn log_level_applies_without_rust_log() {
        let config = TelemetryConfig {
            log_level: Some("DEBUG".to_string()),
            ..TelemetryConfig::default()
        };
        let filter = config.env_filter().to_string();
        assert!(filter.contains("debug"), "{filter}");
    }

    #[test]
    fn rust_log_takes_precedence() {
        let config = TelemetryConfig {
            rust_log: Some("fx_rate_stream=trace".to_string()),
            log_level: Some("error".to_string()),
            ..TelemetryConfig::default()
        };
        let filter = config.env_filter().to_string();
        assert!(filter.contains("fx_rate_stream=trace"), "{filter}");
        assert!(!filter.contains("error"), "{filter}");
    }
}
