//! Logging, tracing, and OTLP export.
//!
//! Without an endpoint only a fmt layer is installed. With one, spans,
//! metrics and log events also go to the collector over gRPC.
//!
//! The binary runs the pool, prints its report, then calls
//! [`TelemetryGuard::finish`]. Export failures surface there rather than
//! through `tracing`, since the pipelines they would travel through are the
//! ones being shut down.

pub mod metrics;
pub mod work;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::{SubscriberInitExt as _, TryInitError};

use crate::error::{Error, Result};

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is not set.
    pub default_level: String,
}

/// The three OTLP pipelines.
struct Exporters {
    traces: SdkTracerProvider,
    metrics: SdkMeterProvider,
    logs: SdkLoggerProvider,
}

impl Exporters {
    fn connect(endpoint: &str, service_name: String) -> Result<Self> {
        let resource = Resource::builder()
            .with_service_name(service_name)
            .with_attribute(KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")))
            .build();

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("span", e))?;
        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("metric", e))?;
        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("log", e))?;

        Ok(Self {
            traces: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(resource.clone())
                .build(),
            metrics: SdkMeterProvider::builder()
                .with_periodic_exporter(metrics)
                .with_resource(resource.clone())
                .build(),
            logs: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(resource)
                .build(),
        })
    }

    /// Flush and shut down every pipeline, continuing past failures.
    /// Returns one message per pipeline that failed.
    fn shutdown(self) -> Vec<String> {
        [
            ("logs", self.logs.shutdown()),
            ("metrics", self.metrics.shutdown()),
            ("traces", self.traces.shutdown()),
        ]
        .into_iter()
        .filter_map(|(pipeline, result)| result.err().map(|e| format!("{pipeline}: {e}")))
        .collect()
    }
}

/// Keeps the export pipelines alive.
///
/// Call [`finish`](Self::finish) once the run is over. A guard dropped
/// without it (an early error return, say) still shuts the pipelines down
/// and prints failures to stderr.
pub struct TelemetryGuard {
    exporters: Option<Exporters>,
}

impl TelemetryGuard {
    /// True when signals are sent to a collector.
    pub fn is_exporting(&self) -> bool {
        self.exporters.is_some()
    }

    /// Flush buffered spans, metrics and logs and shut the pipelines down.
    ///
    /// # Errors
    ///
    /// [`Error::Telemetry`] naming every pipeline that failed.
    pub fn finish(mut self) -> Result<()> {
        let failures = self
            .exporters
            .take()
            .map(Exporters::shutdown)
            .unwrap_or_default();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Telemetry(failures.join("; ")))
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(exporters) = self.exporters.take() {
            for failure in exporters.shutdown() {
                eprintln!("telemetry export failed during shutdown: {failure}");
            }
        }
    }
}

/// Install the global subscriber, plus OTLP export when an endpoint is set.
///
/// # Errors
///
/// Fails if an exporter cannot be built or a global subscriber is already
/// installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let Some(endpoint) = config.endpoint else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(subscriber_error)?;
        return Ok(TelemetryGuard { exporters: None });
    };

    let exporters = Exporters::connect(&endpoint, config.service_name)?;
    opentelemetry::global::set_meter_provider(exporters.metrics.clone());
    let tracer = exporters.traces.tracer("taskscale");

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(OpenTelemetryTracingBridge::new(&exporters.logs))
        .try_init()
        .map_err(subscriber_error)?;

    Ok(TelemetryGuard {
        exporters: Some(exporters),
    })
}

fn exporter_error(signal: &str, e: impl std::fmt::Display) -> Error {
    Error::Telemetry(format!("failed to build OTLP {signal} exporter: {e}"))
}

fn subscriber_error(e: TryInitError) -> Error {
    Error::Telemetry(format!("failed to install tracing subscriber: {e}"))
}
