//! # Logging Initialization
//!
//! The bridge runs in containers, so everything goes to stderr where the
//! runtime collects it.
//!
//! - **Environment Filter (`EnvFilter`)**: `RUST_LOG` wins when set. Otherwise
//!   the given level applies to everything, with `debug` for this crate.
//! - **OpenTelemetry (feature `opentelemetry`)**: when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans are additionally exported over
//!   OTLP/HTTP to that endpoint.
//!
//! Call [`init_logging`] once at the start of `main`. Later calls are no-ops.

#[cfg(feature = "opentelemetry")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "opentelemetry")]
use opentelemetry_sdk::{
    Resource,
    trace::{self as sdktrace, SdkTracerProvider},
};
use std::{io::stderr, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

/// Default filter directive for a base level.
pub fn default_directive(log_level: &str) -> String {
    format!("{log_level},mcp_stdio_bridge=debug")
}

/// Initializes the global tracing subscriber writing to stderr.
///
/// `ansi` enables color codes; turn it off when logs are shipped to a
/// collector rather than read on a terminal.
pub fn init_logging(log_level: &str, ansi: bool) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(ansi));

        #[cfg(feature = "opentelemetry")]
        let subscriber = subscriber.with(init_otel());

        subscriber.init();
    });
}

#[cfg(feature = "opentelemetry")]
fn init_otel<S>() -> Option<tracing_opentelemetry::OpenTelemetryLayer<S, sdktrace::Tracer>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    // The exporter picks the endpoint up from the environment.
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .build()
        .ok()?;

    let resource = Resource::builder()
        .with_service_name("mcp_stdio_bridge")
        .build();

    let provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();

    let tracer = provider.tracer("mcp_stdio_bridge");

    Some(tracing_opentelemetry::layer().with_tracer(tracer))
}
