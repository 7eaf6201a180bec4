//! Tracing subscriber setup.
//!
//! - `RUST_LOG` filters events (default `info`)
//! - `PLACEHERD_LOG_FORMAT=json` switches stderr output to JSON lines
//! - with the `otel` feature, setting `OTEL_EXPORTER_OTLP_ENDPOINT` also
//!   exports spans and events over OTLP/HTTP

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub const ENV_LOG_FORMAT: &str = "PLACEHERD_LOG_FORMAT";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps exporters alive; flushes and shuts them down on drop.
#[must_use]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    otel: Option<otel::Providers>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        if let Some(providers) = self.otel.take() {
            providers.shutdown();
        }
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init() -> TelemetryGuard {
    let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    #[cfg_attr(not(feature = "otel"), allow(unused_mut))]
    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(json)];

    #[cfg(feature = "otel")]
    let otel = otel::init().map(|(providers, otel_layers)| {
        layers.extend(otel_layers);
        providers
    });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init();

    TelemetryGuard {
        #[cfg(feature = "otel")]
        otel,
    }
}

fn fmt_layer(json: bool) -> BoxedLayer {
    if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    }
}

#[cfg(feature = "otel")]
mod otel {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
    use opentelemetry_otlp::{LogExporter, SpanExporter};
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::logs::SdkLoggerProvider;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use tracing_subscriber::Layer;
    use tracing_subscriber::filter::filter_fn;

    use super::BoxedLayer;

    const SERVICE_NAME: &str = "placeherd";
    const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

    pub struct Providers {
        tracer: SdkTracerProvider,
        logger: SdkLoggerProvider,
    }

    impl Providers {
        pub fn shutdown(self) {
            if let Err(e) = self.tracer.shutdown() {
                eprintln!("warning: trace exporter shutdown failed: {e}");
            }
            if let Err(e) = self.logger.shutdown() {
                eprintln!("warning: log exporter shutdown failed: {e}");
            }
        }
    }

    /// Exporter internals log through `tracing` too; keep them out of the
    /// export pipeline.
    fn is_exporter_internal(target: &str) -> bool {
        ["opentelemetry", "reqwest", "hyper", "h2", "tower"]
            .iter()
            .any(|prefix| target.starts_with(prefix))
    }

    pub fn init() -> Option<(Providers, Vec<BoxedLayer>)> {
        std::env::var(ENV_ENDPOINT).ok().filter(|v| !v.is_empty())?;

        let resource = Resource::builder().with_service_name(SERVICE_NAME).build();

        let spans = match SpanExporter::builder().with_http().build() {
            Ok(exporter) => exporter,
            Err(e) => {
                eprintln!("warning: OTLP span exporter unavailable: {e}");
                return None;
            }
        };
        let logs = match LogExporter::builder().with_http().build() {
            Ok(exporter) => exporter,
            Err(e) => {
                eprintln!("warning: OTLP log exporter unavailable: {e}");
                return None;
            }
        };

        let tracer = SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .with_resource(resource.clone())
            .build();
        let logger = SdkLoggerProvider::builder()
            .with_batch_exporter(logs)
            .with_resource(resource)
            .build();

        let layers: Vec<BoxedLayer> = vec![
            tracing_opentelemetry::layer()
                .with_tracer(tracer.tracer(SERVICE_NAME))
                .with_filter(filter_fn(|m| !is_exporter_internal(m.target())))
                .boxed(),
            OpenTelemetryTracingBridge::new(&logger)
                .with_filter(filter_fn(|m| !is_exporter_internal(m.target())))
                .boxed(),
        ];
        Some((Providers { tracer, logger }, layers))
    }

}
