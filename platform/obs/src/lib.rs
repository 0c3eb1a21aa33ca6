//! Tracing setup for the lead workflow binaries.
//!
//! Workflow spans are named `crm.<area>.<operation>` (`crm.kanban.move_card`,
//! `crm.sla.sweep`, ...). The default filter keeps those at `info` while the
//! HTTP and SQL layers stay quiet.

use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{self as sdk, Resource};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Holds the OTLP provider (when exporting) so pending spans can be flushed.
static INIT: OnceCell<Option<sdk::trace::SdkTracerProvider>> = OnceCell::new();

pub const DEFAULT_FILTER: &str = "info,crm=info,server=info,tower_http=warn,sqlx=warn,sea_orm=warn";

#[derive(Clone, Debug)]
pub struct ObsConfig {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub env_filter: Option<String>,
    pub otlp_endpoint: Option<String>,
    /// `deployment.environment` resource attribute on exported spans.
    pub environment: Option<String>,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self::for_service("leadflow-server")
    }
}

impl ObsConfig {
    pub fn for_service(service_name: &'static str) -> Self {
        Self {
            service_name,
            service_version: env!("CARGO_PKG_VERSION"),
            env_filter: None,
            otlp_endpoint: None,
            environment: None,
        }
    }

    /// Override the `RUST_LOG` style filter, e.g. from a `--log` flag.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Fills unset fields from `RUST_LOG`, `OTLP_ENDPOINT` and `LEADFLOW_ENV`.
    pub fn with_env(mut self) -> Self {
        self.env_filter = self.env_filter.or_else(|| non_empty_var("RUST_LOG"));
        self.otlp_endpoint = self.otlp_endpoint.or_else(|| non_empty_var("OTLP_ENDPOINT"));
        self.environment = self.environment.or_else(|| non_empty_var("LEADFLOW_ENV"));
        self
    }

    fn filter(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(DEFAULT_FILTER)
    }

    fn resource(&self) -> Resource {
        let mut attributes = vec![KeyValue::new("service.version", self.service_version)];
        if let Some(environment) = &self.environment {
            attributes.push(KeyValue::new("deployment.environment", environment.clone()));
        }
        Resource::builder()
            .with_service_name(self.service_name)
            .with_attributes(attributes)
            .build()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Install tracing subscribers with optional OTLP exporter. Later calls are
/// no-ops.
pub fn init_tracing(config: ObsConfig) -> Result<()> {
    if INIT.get().is_some() {
        return Ok(());
    }
    let config = config.with_env();

    let env_filter = EnvFilter::try_new(config.filter())?;
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let provider = if let Some(endpoint) = config.otlp_endpoint.clone() {
        let exporter = SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(endpoint)
            .build()?;
        let provider = sdk::trace::SdkTracerProvider::builder()
            .with_resource(config.resource())
            .with_batch_exporter(exporter)
            .build();
        let tracer = provider.tracer(config.service_name);
        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
        Some(provider)
    } else {
        registry.try_init()?;
        None
    };

    INIT.set(provider)
        .map_err(|_| anyhow!("tracing already initialized"))?;
    Ok(())
}

/// Flushes spans still queued for the OTLP exporter. Call before the process
/// exits.
pub fn shutdown_tracing() {
    if let Some(Some(provider)) = INIT.get() {
        if let Err(err) = provider.shutdown() {
            eprintln!("failed to flush trace exporter: {err}");
        }
    }
}
