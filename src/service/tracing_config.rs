use std::time::Duration;

use opentelemetry::{global, Key, KeyValue};
use opentelemetry_sdk::trace::SpanLimits;
use opentelemetry_sdk::{
    metrics::{
        reader::{DefaultAggregationSelector, DefaultTemporalitySelector},
        Aggregation, Instrument, MeterProviderBuilder, PeriodicReader, SdkMeterProvider, Stream,
    },
    runtime,
    trace::{BatchConfigBuilder, RandomIdGenerator, Sampler, Tracer},
    Resource,
};
use opentelemetry_semantic_conventions::{
    resource::{SERVICE_NAME, SERVICE_VERSION},
    SCHEMA_URL,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::fmt::time::ChronoLocal;

use dotenv::dotenv;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::{AppError, AppResult};

/// Log file written next to stdout by [`setup_tracing`], rotated hourly under `logs/`.
const LOG_FILE_PREFIX: &str = "jt808-gateway.log";

fn resource() -> Resource {
    Resource::from_schema_url(
        [
            KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ],
        SCHEMA_URL,
    )
}

// Construct MeterProvider for MetricsLayer
fn init_meter_provider() -> AppResult<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .build_metrics_exporter(
            Box::new(DefaultAggregationSelector::new()),
            Box::new(DefaultTemporalitySelector::new()),
        )
        .map_err(|e| AppError::IllegalStateError(format!("metrics exporter: {}", e)))?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(std::time::Duration::from_secs(30))
        .build();

    // For debugging in development
    let stdout_reader = PeriodicReader::builder(
        opentelemetry_stdout::MetricsExporter::default(),
        runtime::Tokio,
    )
    .build();

    // serial and body_len are per frame; drop them from the counter
    let view_checksum = |instrument: &Instrument| -> Option<Stream> {
        if instrument.name == "tolerated_checksum_mismatch" {
            Some(
                Stream::new()
                    .name("jt808_tolerated_checksum_mismatch")
                    .allowed_attribute_keys(std::iter::empty::<Key>()),
            )
        } else {
            None
        }
    };

    // Multimedia upload sizes in KiB
    let view_upload = |instrument: &Instrument| -> Option<Stream> {
        if instrument.name == "multimedia_upload_kib" {
            Some(
                Stream::new()
                    .name("jt808_multimedia_upload_kib")
                    .aggregation(Aggregation::ExplicitBucketHistogram {
                        boundaries: vec![16.0, 64.0, 256.0, 1024.0, 4096.0, 16384.0],
                        record_min_max: true,
                    }),
            )
        } else {
            None
        }
    };

    let meter_provider = MeterProviderBuilder::default()
        .with_resource(resource())
        .with_reader(reader)
        .with_reader(stdout_reader)
        .with_view(view_checksum)
        .with_view(view_upload)
        .build();

    global::set_meter_provider(meter_provider.clone());

    Ok(meter_provider)
}

// Construct Tracer for OpenTelemetryLayer
fn init_tracer() -> AppResult<Tracer> {
    let span_limits = SpanLimits::default();
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_scheduled_delay(Duration::from_secs(5))
                .build(),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                // Customize sampling strategy
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    1.0,
                ))))
                // If export trace to AWS X-Ray, you can use XrayIdGenerator
                .with_id_generator(RandomIdGenerator::default())
                .with_span_limits(span_limits)
                .with_resource(resource()),
        )
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .install_batch(runtime::Tokio)
        .map_err(|e| AppError::IllegalStateError(format!("otlp tracer: {}", e)))
}

pub struct OtelGuard {
    meter_provider: SdkMeterProvider,
    _worker_guard: WorkerGuard,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(err) = self.meter_provider.shutdown() {
            eprintln!("{err:?}");
        }

        opentelemetry::global::shutdown_tracer_provider();
        tracing::info!("shutdown otel tracer provider");
    }
}

/// Console-only subscriber for tests and local runs. A second call is a no-op.
pub fn setup_local_tracing() -> AppResult<()> {
    dotenv().ok();
    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true);
    // another test in the same binary may have installed it already
    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    Ok(())
}

/// Production subscriber: stdout plus an hourly rolling file, OTLP spans and metrics.
///
/// The returned guard flushes the file writer and shuts the exporters down when dropped.
pub async fn setup_tracing() -> AppResult<OtelGuard> {
    dotenv().ok();
    let file_appender = tracing_appender::rolling::hourly("logs", LOG_FILE_PREFIX);
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
    // console and file
    let writer = non_blocking.and(std::io::stdout);

    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .with_writer(writer);

    let meter_provider = init_meter_provider()?;
    let tracer = init_tracer()?;

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(MetricsLayer::new(meter_provider.clone()))
        .with(OpenTelemetryLayer::new(tracer))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| AppError::IllegalStateError(format!("tracing subscriber: {}", e)))?;

    Ok(OtelGuard {
        meter_provider,
        _worker_guard: worker_guard,
    })
}
