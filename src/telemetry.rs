//! Process-wide logging setup and an in-process log sink.
//!
//! The store only emits `tracing` events; hosts call [`init`] once to route
//! them to stderr and, optionally, a rolling file under the data directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};
use crate::paths;

const LOG_FILE_PREFIX: &str = "pdm-store.log";
const FILTER_ENV: &str = "PDM_LOG";

#[derive(Clone, Debug)]
pub struct SpanContext {
    pub name: &'static str,
    pub fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct LogRecord {
    pub timestamp: SystemTime,
    pub level: Level,
    pub target: &'static str,
    pub message: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub spans: Vec<SpanContext>,
}

impl LogRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Receives every event that passes the filter.
pub trait Logger: Send + Sync {
    fn log(&self, record: LogRecord);
}

#[derive(Clone)]
pub struct TelemetryConfig {
    pub verbosity: u8,
    pub logging: LoggingConfig,
    pub logger: Option<Arc<dyn Logger>>,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, logging: LoggingConfig) -> Self {
        Self {
            verbosity,
            logging,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }
}

/// Keeps the non-blocking file writers flushing; drop it on shutdown.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global subscriber.
///
/// A second call leaves the first subscriber in place and only logs a warning.
pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = build_filter(config.verbosity, config.logging.filter.as_deref());

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.logging.stdout {
        layers.push(build_stdout_layer(config.logging.stdout_format));
    }

    let mut file_prune_report = None;
    let mut file_setup_error = None;
    if config.logging.file.enabled {
        let dir = resolve_log_dir(&config.logging.file);
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                if let Some(retention) = Retention::from_config(&config.logging.file) {
                    match prune_logs(&dir, LOG_FILE_PREFIX, retention, SystemTime::now()) {
                        Ok(report) => file_prune_report = Some(report),
                        Err(err) => {
                            file_setup_error = Some(format!("log retention failed: {err}"));
                        }
                    }
                }

                let (layer, guard) = build_file_layer(&config.logging.file, &dir);
                layers.push(layer);
                guards.push(guard);
            }
            Err(err) => {
                file_setup_error =
                    Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }

    if let Some(logger) = config.logger {
        layers.push(Box::new(RecordingLayer { logger }));
    }

    layers.push(Box::new(filter));

    if let Err(err) = Registry::default().with(layers).try_init() {
        tracing::warn!("telemetry already initialised: {err}");
    }

    if let Some(report) = file_prune_report {
        tracing::info!(
            pruned = report.removed,
            failed = report.failed,
            candidates = report.candidates,
            "log retention applied"
        );
    }
    if let Some(error) = file_setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guards: guards }
}

/// A subscriber that forwards every event to `logger` and nothing else.
///
/// Meant for scoped use with `tracing::subscriber::with_default`.
pub fn recording_subscriber(logger: Arc<dyn Logger>) -> impl Subscriber + Send + Sync {
    Registry::default().with(RecordingLayer { logger })
}

fn build_filter(verbosity: u8, configured: Option<&str>) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(level_from_verbosity(verbosity).into());
    match configured {
        Some(directives) if std::env::var_os(FILTER_ENV).is_none() => {
            builder.parse_lossy(directives)
        }
        _ => builder.with_env_var(FILTER_ENV).from_env_lossy(),
    }
}

#[derive(Clone, Debug, Default)]
struct SpanFields {
    fields: BTreeMap<String, String>,
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: BTreeMap<String, String>,
}

impl FieldVisitor {
    fn record(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record(field, value.to_string());
    }
}

#[derive(Clone)]
struct RecordingLayer {
    logger: Arc<dyn Logger>,
}

impl<S> Layer<S> for RecordingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::Id,
        ctx: Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields {
                fields: visitor.fields,
            });
        }
    }

    fn on_record(&self, id: &tracing::Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            fields.fields.extend(visitor.fields);
        } else {
            extensions.insert(SpanFields {
                fields: visitor.fields,
            });
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        self.logger.log(build_log_record(event, ctx));
    }
}

fn build_log_record<S>(event: &Event<'_>, ctx: Context<'_, S>) -> LogRecord
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let mut visitor = FieldVisitor::default();
    event.record(&mut visitor);
    let spans = ctx
        .event_scope(event)
        .map(|scope| {
            scope
                .from_root()
                .map(|span| SpanContext {
                    name: span.metadata().name(),
                    fields: span
                        .extensions()
                        .get::<SpanFields>()
                        .map(|fields| fields.fields.clone())
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    LogRecord {
        timestamp: SystemTime::now(),
        level: *event.metadata().level(),
        target: event.metadata().target(),
        message: visitor.message,
        fields: visitor.fields,
        spans,
    }
}

fn build_stdout_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Tree => Box::new(
            tracing_tree::HierarchicalLayer::new(2).with_writer(std::io::stderr),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Compact => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        ),
    }
}

/// The file sink is read by tools, so it is JSON unless configured otherwise,
/// in which case it gets plain compact lines.
fn build_file_layer(
    config: &FileLoggingConfig,
    dir: &Path,
) -> (
    Box<dyn Layer<Registry> + Send + Sync>,
    tracing_appender::non_blocking::WorkerGuard,
) {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let rotation = match config.rotation {
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Never => Rotation::NEVER,
    };
    let (writer, guard) =
        tracing_appender::non_blocking(RollingFileAppender::new(rotation, dir, LOG_FILE_PREFIX));
    let base = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => Box::new(base.json().with_current_span(true).with_span_list(true)),
        LogFormat::Tree | LogFormat::Pretty | LogFormat::Compact => Box::new(base.compact()),
    };
    (layer, guard)
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::WARN,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}

fn resolve_log_dir(config: &FileLoggingConfig) -> PathBuf {
    config.dir.clone().unwrap_or_else(paths::log_dir)
}

/// How many rotated log files to keep, and for how long.
#[derive(Clone, Copy, Debug)]
struct Retention {
    max_age: Option<Duration>,
    max_files: Option<usize>,
}

impl Retention {
    /// `None` when neither limit is configured.
    fn from_config(config: &FileLoggingConfig) -> Option<Self> {
        let retention = Self {
            max_age: config
                .retention_max_age_days
                .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60))),
            max_files: config.retention_max_files,
        };
        (retention.max_age.is_some() || retention.max_files.is_some()).then_some(retention)
    }

    /// `logs` must be sorted oldest first. Age is applied before the count.
    fn expired(&self, logs: &[(SystemTime, PathBuf)], now: SystemTime) -> Vec<PathBuf> {
        let too_old = |modified: SystemTime| {
            self.max_age
                .is_some_and(|age| now.duration_since(modified).unwrap_or(Duration::ZERO) > age)
        };
        let (old, young): (Vec<_>, Vec<_>) = logs.iter().partition(|(modified, _)| too_old(*modified));
        let excess = self
            .max_files
            .map_or(0, |max| young.len().saturating_sub(max));
        old.into_iter()
            .chain(young.into_iter().take(excess))
            .map(|(_, path)| path.clone())
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
struct PruneReport {
    candidates: usize,
    removed: usize,
    failed: usize,
}

/// Files in `dir` whose name starts with `prefix`, oldest first.
fn rotated_logs(dir: &Path, prefix: &str) -> std::io::Result<Vec<(SystemTime, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let named = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        let meta = entry.metadata()?;
        if named && meta.is_file() {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            logs.push((modified, entry.path()));
        }
    }
    logs.sort();
    Ok(logs)
}

fn prune_logs(
    dir: &Path,
    prefix: &str,
    retention: Retention,
    now: SystemTime,
) -> std::io::Result<PruneReport> {
    let logs = rotated_logs(dir, prefix)?;
    let mut report = PruneReport {
        candidates: logs.len(),
        ..PruneReport::default()
    };
    for path in retention.expired(&logs, now) {
        match fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "could not remove old log");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
