//! Structured logging setup
//!
//! JSON logs on stdout with the current span attached, filtered through
//! `RUST_LOG` when set. Pod identity from the downward API is recorded once
//! at startup so log lines can be correlated with the emitting replica.

use thiserror::Error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,meridian=debug,kube=info,tower=warn,hyper=warn";

/// Telemetry initialization errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on the startup line
    pub service_name: String,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "meridian".to_string(),
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Install the global JSON subscriber
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    let pod = std::env::var("POD_NAME").unwrap_or_default();
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_default();
    info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        pod = %pod,
        namespace = %namespace,
        "telemetry initialized"
    );

    Ok(())
}
