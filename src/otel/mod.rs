//! OpenTelemetry integration for authgate
//!
//! Spans are exported over OTLP when enabled; the pipeline metrics are always
//! recorded and exported through the same endpoint.

use crate::auth::Rejection;
use crate::config::{LoggingConfig, OtelConfig};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as TracerProviderTrait,
    KeyValue,
};
use opentelemetry_sdk::{
    metrics::MeterProvider as SdkMeterProvider, trace::TracerProvider, Resource,
};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Tracer and meter providers
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    config: OtelConfig,
}

impl OtelProvider {
    /// Build providers; exporters are only attached when enabled
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]);

        let (tracer_provider, meter_provider) = match (config.enabled, &config.endpoint) {
            (false, _) => (
                None,
                SdkMeterProvider::builder().with_resource(resource).build(),
            ),
            (true, None) => {
                return Err(OtelError::Config(
                    "OTLP endpoint is required when enabled".into(),
                ))
            }
            (true, Some(endpoint)) => (
                Some(Self::init_tracer_provider(endpoint, &resource)?),
                Self::init_meter_provider(endpoint, &resource)?,
            ),
        };

        if let Some(ref tp) = tracer_provider {
            global::set_tracer_provider(tp.clone());
        }

        Ok(Self {
            tracer_provider,
            meter_provider,
            config: config.clone(),
        })
    }

    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(
                Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_resource(resource.clone()),
            )
            .build())
    }

    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
            .build())
    }

    /// Tracer for the tracing bridge; a no-op tracer when disabled
    pub fn tracer(&self, name: &'static str) -> opentelemetry_sdk::trace::Tracer {
        match self.tracer_provider {
            Some(ref tp) => tp.tracer(name),
            None => TracerProvider::builder().build().tracer(name),
        }
    }

    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.config.service_name.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Flush spans and stop the meter provider
    pub fn shutdown(&self) -> Result<(), OtelError> {
        self.meter_provider
            .shutdown()
            .map_err(|e| OtelError::Shutdown(format!("Meter shutdown failed: {:?}", e)))?;

        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                result.map_err(|e| OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)))?;
            }
        }

        Ok(())
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Pipeline metrics
pub struct Metrics {
    /// Completed requests by status code
    pub requests_total: Counter<u64>,

    /// Requests refused by a throttling stage
    pub throttled_total: Counter<u64>,

    /// Bearer tokens that did not resolve to an identity
    pub token_rejections_total: Counter<u64>,

    /// Round-trip duration in seconds
    pub request_duration: Histogram<f64>,
}

impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("authgate_requests_total")
                .with_description("Total number of completed requests")
                .init(),
            throttled_total: meter
                .u64_counter("authgate_throttled_total")
                .with_description("Total number of throttled requests")
                .init(),
            token_rejections_total: meter
                .u64_counter("authgate_token_rejections_total")
                .with_description("Total number of rejected bearer tokens")
                .init(),
            request_duration: meter
                .f64_histogram("authgate_request_duration_seconds")
                .with_description("Request round-trip duration in seconds")
                .init(),
        }
    }

    /// Metrics backed by a provider that exports nowhere
    pub fn noop() -> Self {
        Self::new(&SdkMeterProvider::builder().build().meter("authgate"))
    }

    pub fn record_request(&self, status: u16) {
        self.requests_total
            .add(1, &[KeyValue::new("status", i64::from(status))]);
    }

    pub fn record_throttled(&self, stage: &'static str) {
        self.throttled_total
            .add(1, &[KeyValue::new("stage", stage)]);
    }

    pub fn record_token_rejection(&self, reason: Rejection) {
        self.token_rejections_total
            .add(1, &[KeyValue::new("reason", reason.as_str())]);
    }

    pub fn record_request_duration(&self, duration_secs: f64) {
        self.request_duration.record(duration_secs, &[]);
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the configured level. The OpenTelemetry layer is only
/// attached when the provider is enabled.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let otel_layer = otel
        .is_enabled()
        .then(|| tracing_opentelemetry::layer().with_tracer(otel.tracer("authgate")));

    let pretty = logging.format.eq_ignore_ascii_case("pretty");
    let json_layer = (!pretty).then(|| tracing_subscriber::fmt::layer().json());
    let pretty_layer = pretty.then(|| tracing_subscriber::fmt::layer().pretty());

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}
