//! Tracing setup for binaries embedding the coordinator.
//!
//! The crate only emits `tracing` events and `#[instrument]` spans; installing
//! a subscriber is up to the host. [`init_tracing_stdout_only`] covers local
//! runs. With the `otel` feature, [`init_tracing`] additionally exports spans
//! over OTLP so a draft action can be followed across replicas.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,matchcoord=debug";

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install a formatted stdout subscriber filtered by `RUST_LOG`, or `filter`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing_stdout_only(filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(filter))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(feature = "otel")]
pub use otel::{init_tracing, OtelConfig, OtelGuard};

#[cfg(feature = "otel")]
mod otel {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::resource::Resource;
    use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    use crate::error::MatchError;

    #[derive(Debug, Clone)]
    pub struct OtelConfig {
        /// Reported as `service.name`.
        pub service_name: String,
        /// OTLP gRPC collector endpoint.
        pub otlp_endpoint: String,
        pub stdout_logs: bool,
        pub log_filter: String,
    }

    impl Default for OtelConfig {
        fn default() -> Self {
            Self {
                service_name: "matchcoord".to_string(),
                otlp_endpoint: "http://localhost:4317".to_string(),
                stdout_logs: true,
                log_filter: super::DEFAULT_FILTER.to_string(),
            }
        }
    }

    /// Flushes buffered spans when dropped. Keep it alive for the process lifetime.
    pub struct OtelGuard {
        provider: SdkTracerProvider,
    }

    impl Drop for OtelGuard {
        fn drop(&mut self) {
            if let Err(e) = self.provider.shutdown() {
                tracing::warn!(error = %e, "failed to flush spans");
            }
        }
    }

    /// Install a subscriber exporting spans to `config.otlp_endpoint`.
    pub fn init_tracing(config: OtelConfig) -> Result<OtelGuard, MatchError> {
        let invalid = |reason: String| MatchError::InvalidConfig { reason };

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
            .map_err(|e| invalid(format!("otlp exporter: {e}")))?;

        let resource = Resource::new_with_defaults([KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);
        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(resource)
            .build();
        let tracer = provider.tracer(config.service_name);

        let registry = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer));
        let installed = if config.stdout_logs {
            registry
                .with(super::env_filter(&config.log_filter))
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .try_init()
        } else {
            registry.try_init()
        };
        installed.map_err(|e| invalid(format!("tracing subscriber: {e}")))?;

        Ok(OtelGuard { provider })
    }
}
