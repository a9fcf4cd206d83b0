//! Process-wide distributed tracer.
//!
//! [`configure`] installs the global OpenTelemetry tracer provider: a no-op
//! provider when tracing is disabled, an OTLP exporter otherwise. The returned
//! [`Tracer`] is the handle used to flush and shut the provider down.

use opentelemetry::KeyValue;
use opentelemetry::trace::noop::NoopTracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const DEFAULT_PORT: &str = "4317";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("tracing is enabled but no host is configured")]
    MissingHost,
    #[error("failed to build trace exporter for {endpoint}: {source}")]
    Exporter {
        endpoint: String,
        #[source]
        source: opentelemetry_otlp::ExporterBuildError,
    },
}

/// Tracer settings, read from `TRACING_*` variables by the bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub host: String,
    /// Collector port. Empty means 4317.
    pub port: String,
    /// Extra resource attributes attached to every span.
    pub tags: HashMap<String, String>,
}

impl TracingConfig {
    pub fn endpoint(&self) -> String {
        let port = if self.port.is_empty() {
            DEFAULT_PORT
        } else {
            &self.port
        };
        format!("http://{}:{}", self.host, port)
    }
}

/// Handle to the installed tracer provider.
#[derive(Debug, Default)]
pub struct Tracer {
    provider: Option<SdkTracerProvider>,
}

impl Tracer {
    /// A tracer that records nothing.
    pub fn noop() -> Self {
        Self { provider: None }
    }

    pub fn is_noop(&self) -> bool {
        self.provider.is_none()
    }

    /// Flush pending spans and stop exporting.
    pub fn shutdown(self) {
        if let Some(provider) = self.provider
            && let Err(e) = provider.shutdown()
        {
            tracing::warn!(error = %e, "Failed to shut down tracer provider");
        }
    }
}

/// Install the global tracer provider for `service_name`.
///
/// Enabling the exporter requires a running tokio runtime.
pub fn configure(config: &TracingConfig, service_name: &str) -> Result<Tracer, TelemetryError> {
    if !config.enabled {
        opentelemetry::global::set_tracer_provider(NoopTracerProvider::new());
        return Ok(Tracer::noop());
    }
    if config.host.is_empty() {
        return Err(TelemetryError::MissingHost);
    }

    let endpoint = config.endpoint();
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(Duration::from_secs(5))
        .build()
        .map_err(|source| TelemetryError::Exporter {
            endpoint: endpoint.clone(),
            source,
        })?;

    let mut attributes = vec![KeyValue::new("service.name", service_name.to_string())];
    let mut tags: Vec<_> = config.tags.iter().collect();
    tags.sort();
    for (k, v) in tags {
        attributes.push(KeyValue::new(k.clone(), v.clone()));
    }
    let resource = Resource::builder().with_attributes(attributes).build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    info!(endpoint = %endpoint, service = %service_name, "Tracer configured");

    Ok(Tracer {
        provider: Some(provider),
    })
}
