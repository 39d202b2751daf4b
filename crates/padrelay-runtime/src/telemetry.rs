//! Logging and trace export set-up for the relay processes.
//!
//! Call [`init_tracing`] once at process startup.  It reads the settings
//! below into a [`TelemetryConfig`] and installs a `tracing` subscriber with
//! an optional OTLP span exporter.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). Enables span export. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `PADRELAY_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = padrelay_runtime::telemetry::init_tracing("padrelay");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// Console log layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Interpret a `PADRELAY_LOG_FORMAT` value; anything but `json` is compact.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Settings [`init_tracing_with`] installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub fn from_env(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            format: LogFormat::from_setting(std::env::var("PADRELAY_LOG_FORMAT").ok().as_deref()),
            default_filter: DEFAULT_FILTER.to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|endpoint| !endpoint.trim().is_empty()),
        }
    }
}

/// Initialise the global subscriber from the environment.
///
/// The returned [`TracerProviderGuard`] **must** be held for the lifetime of
/// the process; dropping it flushes pending span batches.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    init_tracing_with(&TelemetryConfig::from_env(service_name))
}

/// Initialise the global subscriber from explicit settings.
///
/// When an OTLP endpoint is configured every span, the pipeline and per-key
/// debouncer spans included, is also exported to the collector.  An
/// exporter that fails to build is reported on stderr and logging carries
/// on without it.
pub fn init_tracing_with(config: &TelemetryConfig) -> TracerProviderGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_filter));
    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    let provider = config
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_provider(&config.service_name, endpoint));
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("padrelay")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TracerProviderGuard(provider)
}

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending
/// spans.  Hold one in `main` for the whole program.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[padrelay] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

fn build_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[padrelay] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Exports from its own thread, so no blocking inside the runtime.
            .with_batch_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_json_selects_the_json_layout() {
        assert_eq!(LogFormat::from_setting(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::from_setting(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::from_setting(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::from_setting(None), LogFormat::Compact);
    }

    #[test]
    fn blank_endpoint_disables_export() {
        // SAFETY: single-threaded test; no other thread reads this env-var.
        unsafe { std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "  ") };
        let config = TelemetryConfig::from_env("padrelay-test");
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };

        assert_eq!(config.service_name, "padrelay-test");
        assert_eq!(config.default_filter, "info");
        assert_eq!(config.otlp_endpoint, None);
    }

    #[test]
    fn guard_without_provider_drops_cleanly() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }
}
