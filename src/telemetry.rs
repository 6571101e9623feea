use anyhow::{Context, Result, anyhow};
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_NAME: &str = "classpatch";
const TRACES_PATH: &str = "/v1/traces";

/// OTLP trace export for one run.
pub(crate) struct Telemetry {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    pub(crate) fn new(endpoint: String) -> Result<Self> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(traces_endpoint(&endpoint)?)
            .build()
            .context("build OTLP span exporter")?;
        Ok(Self::with_exporter(exporter))
    }

    // Spans close on rayon workers too; the batch processor hands them to
    // its own export thread.
    fn with_exporter<E: SpanExporter + 'static>(exporter: E) -> Self {
        let provider = SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
            .with_span_processor(BatchSpanProcessor::builder(exporter).build())
            .build();
        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider.clone());
        Self { tracer, provider }
    }

    /// Flush pending spans.
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|err| anyhow!("failed to shut down tracer provider: {err}"))
    }
}

/// A bare collector address gets the OTLP/HTTP traces path; an explicit
/// path is kept.
fn traces_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint)
        .with_context(|| format!("invalid OTLP endpoint {endpoint}"))?;
    if url.path() == "/" {
        url.set_path(TRACES_PATH);
    }
    Ok(url.to_string())
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default
/// filter.
pub(crate) fn init_logging(quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if quiet { "error" } else { "classpatch=info,warn" })
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Run `f` inside span `name` when telemetry is enabled.
pub(crate) fn with_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    let Some(telemetry) = telemetry else {
        return f();
    };
    telemetry.tracer.in_span(name.to_string(), |cx| {
        let span = cx.span();
        for attribute in attributes {
            span.set_attribute(attribute.clone());
        }
        f()
    })
}

pub(crate) fn add_current_span_event(name: &str, attributes: &[KeyValue]) {
    let cx = OtelContext::current();
    let span = cx.span();
    if span.span_context().is_valid() {
        span.add_event(name.to_string(), attributes.to_vec());
    }
}

pub(crate) fn current_trace_id() -> Option<String> {
    let cx = OtelContext::current();
    let span_context = cx.span().span_context().clone();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::error::OTelSdkResult;
    use opentelemetry_sdk::trace::SpanData;

    #[derive(Debug)]
    struct DiscardExporter;

    impl SpanExporter for DiscardExporter {
        async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
            Ok(())
        }
    }

    #[test]
    fn spans_carry_a_trace_id() {
        let telemetry = Telemetry::with_exporter(DiscardExporter);
        let trace_id = with_span(
            Some(&telemetry),
            "classpatch.resolve",
            &[KeyValue::new("classpatch.patch", "fix.patch")],
            current_trace_id,
        );
        assert_eq!(trace_id.map(|id| id.len()), Some(32));
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn without_telemetry_the_closure_still_runs() {
        assert_eq!(with_span(None, "classpatch.store", &[], || 7), 7);
        assert!(current_trace_id().is_none());
        add_current_span_event("classpatch.scope_found", &[]);
    }

    #[test]
    fn bare_collector_address_gets_traces_path() {
        assert_eq!(
            traces_endpoint("http://localhost:4318").expect("endpoint"),
            "http://localhost:4318/v1/traces"
        );
        assert_eq!(
            traces_endpoint("http://collector:4318/custom/traces").expect("endpoint"),
            "http://collector:4318/custom/traces"
        );
        assert!(traces_endpoint("not a url").is_err());
    }
}
