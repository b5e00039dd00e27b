use anyhow::{Context as _, Result, anyhow};
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::{
    logs::SdkLoggerProvider, metrics::SdkMeterProvider, trace::SdkTracerProvider,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt as tfmt};

const SERVICE_NAME: &str = "promptnodes";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

/// Where logs go and how chatty they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub log_level: LogLevel,
    pub log_dir: PathBuf,
    pub log_file: String,
    pub event_file: String,
    pub otel_endpoint: Option<String>,
}

impl LogConfig {
    pub fn new(root: &Path, log_level: LogLevel, otel_endpoint: Option<String>) -> Self {
        Self {
            log_level,
            log_dir: root.join("logs"),
            log_file: "promptnodes.log".into(),
            event_file: "node_runs.json".into(),
            otel_endpoint,
        }
    }
}

/// Keeps exporters alive; dropping it flushes them.
pub enum TelemetryGuard {
    Files,
    Otlp {
        logger_provider: SdkLoggerProvider,
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
    },
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let TelemetryGuard::Otlp {
            logger_provider,
            tracer_provider,
            meter_provider,
        } = self
        {
            for result in [
                logger_provider.shutdown(),
                tracer_provider.shutdown(),
                meter_provider.shutdown(),
            ] {
                if let Err(e) = result {
                    eprintln!("telemetry shutdown: {e}");
                }
            }
        }
    }
}

/// Install the global subscriber: rolling files by default, OTLP/HTTP when an
/// endpoint is configured.
pub fn init_tracing(config: &LogConfig) -> Result<TelemetryGuard> {
    match &config.otel_endpoint {
        Some(endpoint) => init_otlp(&config.log_level.to_string(), endpoint),
        None => init_files(
            &config.log_level.to_string(),
            &config.log_dir.join(&config.log_file),
            &config.log_dir.join(&config.event_file),
        ),
    }
}

fn split_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("log path {} has no parent", path.display()))?;
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("log path {} has no file name", path.display()))?;
    Ok((dir, name))
}

fn init_files(log_level: &str, log_file: &Path, event_file: &Path) -> Result<TelemetryGuard> {
    let (log_dir, log_name) = split_path(log_file)?;
    let (event_dir, event_name) = split_path(event_file)?;
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log dir {}", log_dir.display()))?;

    let txt_layer = tfmt::layer()
        .with_writer(RollingFileAppender::new(Rotation::DAILY, log_dir, log_name))
        .with_ansi(false)
        .with_filter(EnvFilter::new(log_level));

    // one JSON line per node run, emitted under target "request"
    let json_layer = tfmt::layer()
        .json()
        .with_writer(RollingFileAppender::new(Rotation::DAILY, event_dir, event_name))
        .with_target(true)
        .with_filter(EnvFilter::new("request=info"));

    let console_layer = tfmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new("warn"));

    Registry::default()
        .with(txt_layer)
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("tracing already initialised: {e}"))?;

    info!("file logging to {}", log_file.display());
    Ok(TelemetryGuard::Files)
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();

fn resource() -> Resource {
    RESOURCE
        .get_or_init(|| Resource::builder().with_service_name(SERVICE_NAME).build())
        .clone()
}

fn init_otlp(log_level: &str, endpoint: &str) -> Result<TelemetryGuard> {
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(
            LogExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(endpoint)
                .build()
                .context("log exporter")?,
        )
        .with_resource(resource())
        .build();
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(
            SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(endpoint)
                .build()
                .context("span exporter")?,
        )
        .with_resource(resource())
        .build();
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(
            MetricExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(endpoint)
                .build()
                .context("metric exporter")?,
        )
        .with_resource(resource())
        .build();

    // keep the exporter's own HTTP traffic out of the exported logs
    let quiet = |level: &str| -> Result<EnvFilter> {
        let mut filter = EnvFilter::new(level);
        for noisy in ["hyper=off", "tonic=off", "h2=off", "reqwest=off"] {
            filter = filter.add_directive(noisy.parse()?);
        }
        Ok(filter)
    };

    let otel_layer = OpenTelemetryTracingBridge::new(&logger_provider).with_filter(quiet(log_level)?);
    let fmt_layer = tfmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_filter(EnvFilter::new("warn"));

    Registry::default()
        .with(otel_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("tracing already initialised: {e}"))?;

    global::set_tracer_provider(tracer_provider.clone());
    global::set_meter_provider(meter_provider.clone());
    info!(endpoint, "OTLP telemetry enabled");

    Ok(TelemetryGuard::Otlp {
        logger_provider,
        tracer_provider,
        meter_provider,
    })
}

/// Per-node-run counters and latency, recorded against whatever meter
/// provider is installed (a no-op one when telemetry is off).
pub struct NodeMetrics {
    runs_started: Counter<u64>,
    runs_succeeded: Counter<u64>,
    runs_failed: Counter<u64>,
    latency_ms: Histogram<f64>,
}

impl fmt::Debug for NodeMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeMetrics").finish_non_exhaustive()
    }
}

impl NodeMetrics {
    pub fn new() -> Self {
        let meter = global::meter(SERVICE_NAME);
        Self {
            runs_started: meter
                .u64_counter("node_runs_started")
                .with_description("Node runs started")
                .build(),
            runs_succeeded: meter.u64_counter("node_runs_succeeded").build(),
            runs_failed: meter.u64_counter("node_runs_failed").build(),
            latency_ms: meter
                .f64_histogram("node_latency_ms")
                .with_description("Latency per node run in ms")
                .with_unit("ms")
                .build(),
        }
    }

    pub fn started(&self, class: &str) {
        self.runs_started
            .add(1, &[KeyValue::new("class", class.to_string())]);
    }

    /// Record the outcome and emit the JSON run event.
    pub fn finished(&self, class: &str, node_id: &str, elapsed_ms: f64, error: Option<&str>) {
        let attrs = [KeyValue::new("class", class.to_string())];
        self.latency_ms.record(elapsed_ms, &attrs);
        match error {
            None => self.runs_succeeded.add(1, &attrs),
            Some(e) => {
                self.runs_failed.add(1, &attrs);
                error!(class, node_id, error = %e, "node run failed in {:.1} ms", elapsed_ms);
            }
        }
        tracing::event!(
            target: "request",
            tracing::Level::INFO,
            class,
            node_id,
            latency_ms = elapsed_ms,
            status = if error.is_none() { "ok" } else { "error" },
        );
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
