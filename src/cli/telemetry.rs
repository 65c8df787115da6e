//! Log formatting and the optional OTLP trace exporter.
//!
//! Spans are exported over gRPC when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! `OTEL_EXPORTER_OTLP_HEADERS` (`k1=v1,k2=v2`) is sent as request metadata.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::TraceContextPropagator,
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Where and how spans are shipped.
#[derive(Debug, PartialEq, Eq)]
struct Exporter {
    endpoint: String,
    /// Host to verify when the endpoint is TLS.
    tls_domain: Option<String>,
    metadata: Vec<(String, String)>,
}

impl Exporter {
    fn from_env() -> Option<Self> {
        let endpoint = var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
        let headers = var("OTEL_EXPORTER_OTLP_HEADERS").unwrap_or_default();
        Some(Self::new(&endpoint, &headers))
    }

    /// Bare `host:port` endpoints are taken as TLS.
    fn new(endpoint: &str, headers: &str) -> Self {
        let endpoint = endpoint.trim().trim_end_matches('/');
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        let tls_domain = endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split(['/', ':']).next())
            .filter(|host| !host.is_empty())
            .map(str::to_string);
        let metadata = headers
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Self {
            endpoint,
            tls_domain,
            metadata,
        }
    }

    fn metadata_map(&self) -> Result<MetadataMap> {
        let mut map = MetadataMap::with_capacity(self.metadata.len());
        for (key, value) in &self.metadata {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid OTLP header name {key}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .with_context(|| format!("invalid OTLP header value for {key}"))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    fn tracer(&self) -> Result<Tracer> {
        let mut builder = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_compression(Compression::Gzip)
            .with_timeout(Duration::from_secs(3))
            .with_metadata(self.metadata_map()?);
        if let Some(domain) = &self.tls_domain {
            builder = builder.with_tls_config(
                ClientTlsConfig::new()
                    .domain_name(domain.clone())
                    .with_native_roots(),
            );
        }

        let instance_id =
            var("OTEL_SERVICE_INSTANCE_ID").unwrap_or_else(|_| Ulid::new().to_string());
        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(builder.build()?)
            .with_resource(
                Resource::builder_empty()
                    .with_attributes([
                        KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                        KeyValue::new("service.instance.id", instance_id),
                    ])
                    .build(),
            )
            .build();

        let _ = TRACER_PROVIDER.set(provider.clone());
        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TraceContextPropagator::new());

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// Initialize logging and, when configured, the OTLP trace exporter.
///
/// # Errors
///
/// Returns an error if tracer or subscriber initialization fails
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    let otel_layer = match Exporter::from_env() {
        Some(exporter) => Some(tracing_opentelemetry::layer().with_tracer(exporter.tracer()?)),
        None => None,
    };

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush and stop the tracer provider, if one was installed.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_http_endpoint() {
        let exporter = Exporter::new("http://localhost:4317/", "");
        assert_eq!(exporter.endpoint, "http://localhost:4317");
        assert_eq!(exporter.tls_domain, None);
        assert!(exporter.metadata.is_empty());
    }

    #[test]
    fn bare_endpoint_is_tls() {
        let exporter = Exporter::new("collector.internal:4317", "");
        assert_eq!(exporter.endpoint, "https://collector.internal:4317");
        assert_eq!(exporter.tls_domain.as_deref(), Some("collector.internal"));
    }

    #[test]
    fn headers_become_metadata() -> Result<()> {
        let exporter = Exporter::new(
            "https://otlp.example.com",
            "Authorization = Bearer abc , malformed, x-team=a=b",
        );
        assert_eq!(
            exporter.metadata,
            vec![
                ("authorization".to_string(), "Bearer abc".to_string()),
                ("x-team".to_string(), "a=b".to_string()),
            ]
        );
        let map = exporter.metadata_map()?;
        assert_eq!(map.len(), 2);
        assert!(map.get("authorization").is_some());
        Ok(())
    }

    #[test]
    fn invalid_header_value_is_an_error() {
        let exporter = Exporter::new("https://otlp.example.com", "x-team=line\nbreak");
        assert!(exporter.metadata_map().is_err());
    }

    #[test]
    fn shutdown_without_provider_is_a_noop() {
        shutdown_tracer();
    }
}
