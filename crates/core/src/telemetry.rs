// Telemetry Module
//
// Console logging through tracing-subscriber with an env-driven filter.
// Engine spans record `stepflow.operation` with the values in `attrs`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Span attribute values used across the engine
pub mod attrs {
    /// Operation names recorded as `stepflow.operation`
    pub mod operation {
        pub const START: &str = "start";
        pub const TRANSITION: &str = "transition";
        pub const ACQUIRE_LOCK: &str = "acquire_lock";
        pub const RELEASE_LOCK: &str = "release_lock";
        pub const CREATE_ROUTE: &str = "create_route";
        pub const UPDATE_ROUTE: &str = "update_route";
    }
}

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on startup
    pub service_name: String,
    /// Service version
    pub service_version: Option<String>,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "debug", "stepflow=debug")
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "stepflow".to_string(),
            service_version: None,
            enable_console: true,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVICE_NAME`: Service name (default: "stepflow")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "stepflow".to_string()),
            service_version: None,
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Guard returned by [`init_telemetry`]. Keep it alive for the lifetime of
/// the application.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service_name, "telemetry shut down");
    }
}

/// Initialize logging with the given configuration
///
/// # Example
///
/// ```ignore
/// use stepflow_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let _guard = init_telemetry(TelemetryConfig::from_env());
///     // ... your application code
/// }
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter = config
        .log_filter
        .as_ref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let console_layer = if config.enable_console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(filter),
        )
    } else {
        None
    };

    // try_init so tests and embedders that already installed a subscriber keep theirs
    if tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("global subscriber already set, keeping it");
    }

    tracing::info!(
        service = %config.service_name,
        version = config.service_version.as_deref().unwrap_or("unknown"),
        "telemetry initialized"
    );

    TelemetryGuard {
        service_name: config.service_name,
    }
}
