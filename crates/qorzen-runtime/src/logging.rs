//! Logging: structured records to console and a rotating file, with a tap
//! republishing each record onto the event bus.
//!
//! Built on `tracing`/`tracing-subscriber`; file rotation uses
//! `tracing-appender`. After the bus is up, every record is also published
//! as `log/<level>` with the component (target) and fields in the payload.
//! Records emitted by the bus's own internals are filtered out so a log
//! line can never feed back into itself through the bus.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::field::{Field, Visit};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use qorzen_core::bus::EventSink;
use qorzen_core::foundation::event::Event;
use qorzen_core::manager::Manager;

use crate::config::schema::{FileLogConfig, LogFormat, LoggingConfig, RotationKind};

/// Global flag ensuring the subscriber is installed at most once per
/// process.
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Late-bound event sink slot shared with the bus tap layer.
pub type BusTapSlot = Arc<RwLock<Option<Arc<dyn EventSink>>>>;

thread_local! {
    static IN_BUS_TAP: Cell<bool> = const { Cell::new(false) };
}

/// Module-path prefixes whose records are never republished, preventing
/// log → event → log recursion.
const TAP_EXCLUDED_TARGETS: &[&str] = &["qorzen_core::bus", "qorzen_runtime::logging"];

// =============================================================================
// Bus tap layer
// =============================================================================

/// A `tracing` layer forwarding each record to the event bus as
/// `log/<level>`.
pub struct BusTapLayer {
    slot: BusTapSlot,
}

impl BusTapLayer {
    /// Creates a tap over a late-bound sink slot.
    pub fn new(slot: BusTapSlot) -> Self {
        Self { slot }
    }
}

struct PayloadVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Visit for PayloadVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::String(rendered));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::from(value));
    }
}

fn level_segment(level: &tracing::Level) -> &'static str {
    match *level {
        tracing::Level::ERROR => "error",
        tracing::Level::WARN => "warning",
        tracing::Level::INFO => "info",
        tracing::Level::DEBUG => "debug",
        tracing::Level::TRACE => "debug",
    }
}

impl<S> Layer<S> for BusTapLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if TAP_EXCLUDED_TARGETS.iter().any(|t| target.starts_with(t)) {
            return;
        }
        if IN_BUS_TAP.with(|flag| flag.get()) {
            return;
        }
        let Some(sink) = self.slot.read().clone() else {
            return;
        };

        IN_BUS_TAP.with(|flag| flag.set(true));

        let mut visitor = PayloadVisitor {
            message: None,
            fields: serde_json::Map::new(),
        };
        event.record(&mut visitor);

        let level = level_segment(event.metadata().level());
        let mut builder = Event::builder(format!("log/{level}"), target.to_string())
            .payload_entry("level", level)
            .payload_entry("component", target.to_string());
        if let Some(message) = visitor.message {
            builder = builder.payload_entry("message", message);
        }
        for (key, value) in visitor.fields {
            builder = builder.payload_entry(key, value);
        }
        let _ = sink.try_publish(builder.build());

        IN_BUS_TAP.with(|flag| flag.set(false));
    }
}

// =============================================================================
// LoggingBuilder
// =============================================================================

/// Builder assembling the console layer, the rotating file layer, the bus
/// tap, and the level filter.
pub struct LoggingBuilder {
    directive: String,
    extra_directives: Vec<String>,
    console: bool,
    format: LogFormat,
    file: Option<FileLogConfig>,
    tap: Option<BusTapSlot>,
}

impl LoggingBuilder {
    /// Builder from the `logging` config section.
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            directive: config.tracing_directive().to_string(),
            extra_directives: Vec::new(),
            console: config.console,
            format: config.format,
            file: config.file.clone(),
            tap: None,
        }
    }

    /// Adds a module-level filter directive (`qorzen_core=debug`).
    pub fn directive(mut self, directive: &str) -> Self {
        self.extra_directives.push(directive.to_string());
        self
    }

    /// Attaches the bus tap over a late-bound sink slot.
    pub fn with_bus_tap(mut self, slot: BusTapSlot) -> Self {
        self.tap = Some(slot);
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.directive));
        for directive in &self.extra_directives {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
        filter
    }

    fn build_file_writer(
        config: &FileLogConfig,
    ) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
        let rotation = match config.rotation {
            RotationKind::Hourly => Rotation::HOURLY,
            RotationKind::Daily => Rotation::DAILY,
            RotationKind::Never => Rotation::NEVER,
        };
        let appender = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(&config.prefix)
            .max_log_files(config.max_files.max(1))
            .build(&config.directory)
            .map_err(std::io::Error::other)?;
        Ok(tracing_appender::non_blocking(appender))
    }

    /// Installs the subscriber. Returns a handle keeping the file writer
    /// alive; returns `Ok(None)` when another subscriber was installed
    /// first.
    pub fn try_init(self) -> anyhow::Result<Option<LoggingHandle>> {
        if LOGGING_INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }

        let filter = self.build_filter();
        let console = self.console.then(|| fmt::layer());
        let tap = self.tap.map(BusTapLayer::new);

        let (file_layer, guard) = match &self.file {
            Some(file_config) => {
                let (writer, guard) = Self::build_file_writer(file_config)?;
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        #[cfg(feature = "json-log")]
        if self.format == LogFormat::Json {
            tracing_subscriber::registry()
                .with(console.map(|l| l.json()))
                .with(file_layer.map(|l| l.json()))
                .with(tap)
                .with(filter)
                .try_init()?;
            return Ok(Some(LoggingHandle { _guard: guard }));
        }
        #[cfg(not(feature = "json-log"))]
        let _ = self.format;

        tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .with(tap)
            .with(filter)
            .try_init()?;
        Ok(Some(LoggingHandle { _guard: guard }))
    }
}

/// Keeps the non-blocking file writer alive; dropping it flushes.
pub struct LoggingHandle {
    _guard: Option<WorkerGuard>,
}

// =============================================================================
// LoggingManager
// =============================================================================

/// Manager wrapper owning the logging setup and the bus tap slot.
pub struct LoggingManager {
    config: LoggingConfig,
    slot: BusTapSlot,
    handle: Mutex<Option<LoggingHandle>>,
}

impl LoggingManager {
    /// Creates the manager; the subscriber is installed on initialize.
    pub fn new(config: LoggingConfig) -> Self {
        Self {
            config,
            slot: Arc::new(RwLock::new(None)),
            handle: Mutex::new(None),
        }
    }

    /// Wires the event sink the tap publishes into.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.slot.write() = Some(sink);
    }
}

#[async_trait]
impl Manager for LoggingManager {
    fn name(&self) -> &str {
        "logging"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        let handle = LoggingBuilder::from_config(&self.config)
            .with_bus_tap(Arc::clone(&self.slot))
            .try_init()?;
        *self.handle.lock() = handle;
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        // The bus shuts down before logging (it depends on us); stop
        // tapping and flush the file writer.
        *self.slot.write() = None;
        *self.handle.lock() = None;
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qorzen_core::foundation::error::EventBusResult;

    struct Recorder(parking_lot::Mutex<Vec<Event>>);
    impl EventSink for Recorder {
        fn try_publish(&self, event: Event) -> EventBusResult<()> {
            self.0.lock().push(event);
            Ok(())
        }
    }

    #[test]
    fn test_level_segments() {
        assert_eq!(level_segment(&tracing::Level::WARN), "warning");
        assert_eq!(level_segment(&tracing::Level::TRACE), "debug");
        assert_eq!(level_segment(&tracing::Level::ERROR), "error");
    }

    #[test]
    fn test_bus_tap_publishes_records() {
        let slot: BusTapSlot = Arc::new(RwLock::new(None));
        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        *slot.write() = Some(Arc::clone(&recorder) as Arc<dyn EventSink>);

        let subscriber =
            tracing_subscriber::registry().with(BusTapLayer::new(Arc::clone(&slot)));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(component_state = "ready", "component came up");
        });

        let events = recorder.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "log/info");
        assert_eq!(
            events[0].payload_get("message"),
            Some(&serde_json::Value::String("component came up".into()))
        );
        assert_eq!(
            events[0].payload_get("component_state"),
            Some(&serde_json::Value::String("ready".into()))
        );
    }

    #[test]
    fn test_excluded_targets_are_not_tapped() {
        let slot: BusTapSlot = Arc::new(RwLock::new(None));
        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        *slot.write() = Some(Arc::clone(&recorder) as Arc<dyn EventSink>);

        let subscriber =
            tracing_subscriber::registry().with(BusTapLayer::new(Arc::clone(&slot)));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "qorzen_core::bus::dispatch", "internal bus chatter");
        });

        assert!(recorder.0.lock().is_empty());
    }
}
