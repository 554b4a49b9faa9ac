//! Classified error capture and routing.
//!
//! The [`ErrorHandler`] records every reported failure as an [`ErrorInfo`],
//! applies the first matching *error strategy* (exact source/plugin/component
//! matchers before prefix matchers), notifies subscribers, and re-emits the
//! record as an `error/<severity>` event. Critical errors that no strategy
//! absorbs are forwarded on the critical channel, which the kernel turns
//! into a shutdown request.
//!
//! Errors inside plugins never cross into the kernel unhandled: host↔plugin
//! call sites wrap plugin code in an [`ErrorBoundary`] that routes anything
//! raised to [`ErrorHandler::handle_error`] with the declared context.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::EventSink;
use crate::foundation::error::{BoxError, Severity};
use crate::foundation::event::Event;
use crate::manager::Manager;

/// Maximum number of records kept in the error history.
const HISTORY_CAPACITY: usize = 1000;

// =============================================================================
// ErrorInfo
// =============================================================================

/// A captured, classified error record.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    /// Unique record id.
    pub id: Uuid,
    /// Human-readable message.
    pub message: String,
    /// Logical origin, e.g. `event_bus/sub-a` or `plugin_manager`.
    pub source: String,
    /// Routing severity.
    pub severity: Severity,
    /// Owning plugin, when the error came from plugin code.
    pub plugin_id: Option<String>,
    /// Component within the source, when finer than `source`.
    pub component: Option<String>,
    /// Captured backtrace or debug rendering, when available.
    pub traceback: Option<String>,
    /// Free-form context.
    pub metadata: Map<String, Value>,
    /// Whether a strategy absorbed the error.
    pub handled: bool,
    /// Capture timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Declared context for a report: where it happened and how severe it is.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Logical origin.
    pub source: String,
    /// Routing severity.
    pub severity: Severity,
    /// Owning plugin, if any.
    pub plugin_id: Option<String>,
    /// Component within the source, if any.
    pub component: Option<String>,
}

impl ErrorContext {
    /// Context with just a source, severity `medium`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            severity: Severity::Medium,
            plugin_id: None,
            component: None,
        }
    }

    /// Sets the severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the owning plugin.
    pub fn plugin(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    /// Sets the component.
    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}

// =============================================================================
// Strategies and subscribers
// =============================================================================

/// What a strategy decided about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The error is handled; critical escalation is suppressed.
    Absorbed,
    /// Continue normal escalation.
    Propagate,
}

/// A registered error strategy.
pub type ErrorStrategy = Arc<dyn Fn(&ErrorInfo) -> ErrorDisposition + Send + Sync>;

/// A registered error subscriber, notified after every capture.
pub type ErrorSubscriber = Arc<dyn Fn(&ErrorInfo) + Send + Sync>;

/// Selects which errors a strategy applies to.
///
/// `None` fields match anything. An exact matcher requires `source` to equal
/// the record's source; a prefix matcher requires the record's source to
/// start with it. Exact matchers are always tried before prefix matchers,
/// in registration order.
#[derive(Debug, Clone, Default)]
pub struct StrategyMatcher {
    /// Source to match.
    pub source: Option<String>,
    /// Treat `source` as a prefix instead of an exact value.
    pub source_is_prefix: bool,
    /// Plugin id to match exactly.
    pub plugin_id: Option<String>,
    /// Component to match exactly.
    pub component: Option<String>,
}

impl StrategyMatcher {
    /// Matcher on an exact source.
    pub fn exact(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    /// Matcher on a source prefix.
    pub fn prefix(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            source_is_prefix: true,
            ..Self::default()
        }
    }

    fn matches(&self, info: &ErrorInfo) -> bool {
        if let Some(source) = &self.source {
            let hit = if self.source_is_prefix {
                info.source.starts_with(source.as_str())
            } else {
                info.source == *source
            };
            if !hit {
                return false;
            }
        }
        if let Some(plugin) = &self.plugin_id
            && info.plugin_id.as_deref() != Some(plugin.as_str())
        {
            return false;
        }
        if let Some(component) = &self.component
            && info.component.as_deref() != Some(component.as_str())
        {
            return false;
        }
        true
    }
}

// =============================================================================
// ErrorHandler
// =============================================================================

/// Central error capture, strategy routing, and history.
pub struct ErrorHandler {
    history: Mutex<VecDeque<ErrorInfo>>,
    strategies: RwLock<Vec<(StrategyMatcher, ErrorStrategy)>>,
    subscribers: RwLock<Vec<ErrorSubscriber>>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    critical_tx: mpsc::UnboundedSender<ErrorInfo>,
    critical_rx: Mutex<Option<mpsc::UnboundedReceiver<ErrorInfo>>>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    /// Creates a new handler with an empty history.
    pub fn new() -> Self {
        let (critical_tx, critical_rx) = mpsc::unbounded_channel();
        Self {
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            strategies: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            sink: RwLock::new(None),
            critical_tx,
            critical_rx: Mutex::new(Some(critical_rx)),
        }
    }

    /// Wires the event sink used for `error/<severity>` re-emission.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Takes the channel on which unabsorbed critical errors are delivered.
    /// The kernel consumes it; `None` after the first call.
    pub fn take_critical_receiver(&self) -> Option<mpsc::UnboundedReceiver<ErrorInfo>> {
        self.critical_rx.lock().take()
    }

    /// Registers an error strategy. First match wins; exact matchers are
    /// consulted before prefix matchers, each group in registration order.
    pub fn register_strategy(&self, matcher: StrategyMatcher, strategy: ErrorStrategy) {
        self.strategies.write().push((matcher, strategy));
    }

    /// Registers a subscriber notified after every capture.
    pub fn register_subscriber(&self, subscriber: ErrorSubscriber) {
        self.subscribers.write().push(subscriber);
    }

    /// Records an error without traceback.
    pub fn handle_error(
        &self,
        message: impl Into<String>,
        ctx: ErrorContext,
        metadata: Map<String, Value>,
    ) -> ErrorInfo {
        self.capture(message.into(), None, ctx, metadata)
    }

    /// Records an error with a captured traceback.
    pub fn handle_error_with_trace(
        &self,
        message: impl Into<String>,
        traceback: impl Into<String>,
        ctx: ErrorContext,
        metadata: Map<String, Value>,
    ) -> ErrorInfo {
        self.capture(message.into(), Some(traceback.into()), ctx, metadata)
    }

    fn capture(
        &self,
        message: String,
        traceback: Option<String>,
        ctx: ErrorContext,
        metadata: Map<String, Value>,
    ) -> ErrorInfo {
        let mut info = ErrorInfo {
            id: Uuid::new_v4(),
            message,
            source: ctx.source,
            severity: ctx.severity,
            plugin_id: ctx.plugin_id,
            component: ctx.component,
            traceback,
            metadata,
            handled: false,
            timestamp: Utc::now(),
        };

        if let Some(strategy) = self.find_strategy(&info) {
            info.handled = strategy(&info) == ErrorDisposition::Absorbed;
        }

        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(info.clone());
        }

        for subscriber in self.subscribers.read().iter() {
            subscriber(&info);
        }

        self.emit(&info);

        if info.severity == Severity::Critical && !info.handled {
            warn!(source = %info.source, "Unabsorbed critical error, requesting shutdown");
            let _ = self.critical_tx.send(info.clone());
        }

        info
    }

    fn find_strategy(&self, info: &ErrorInfo) -> Option<ErrorStrategy> {
        let strategies = self.strategies.read();
        strategies
            .iter()
            .find(|(m, _)| !m.source_is_prefix && m.matches(info))
            .or_else(|| {
                strategies
                    .iter()
                    .find(|(m, _)| m.source_is_prefix && m.matches(info))
            })
            .map(|(_, s)| Arc::clone(s))
    }

    fn emit(&self, info: &ErrorInfo) {
        let Some(sink) = self.sink.read().clone() else {
            return;
        };
        let mut builder = Event::builder(format!("error/{}", info.severity), info.source.clone())
            .payload_entry("error_id", info.id.to_string())
            .payload_entry("message", info.message.clone())
            .payload_entry("handled", info.handled);
        if let Some(plugin) = &info.plugin_id {
            builder = builder.payload_entry("plugin_id", plugin.clone());
        }
        if let Some(component) = &info.component {
            builder = builder.payload_entry("component", component.clone());
        }
        if let Err(e) = sink.try_publish(builder.build()) {
            debug!(error = %e, "Could not emit error event");
        }
    }

    /// Returns the newest records, most recent first, up to `limit`.
    pub fn history(&self, limit: usize) -> Vec<ErrorInfo> {
        let history = self.history.lock();
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Returns the newest records at or above `severity`, most recent first.
    pub fn history_by_severity(&self, severity: Severity, limit: usize) -> Vec<ErrorInfo> {
        let history = self.history.lock();
        history
            .iter()
            .rev()
            .filter(|info| info.severity >= severity)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Creates a boundary routing failures into this handler with the given
    /// context.
    pub fn boundary(self: &Arc<Self>, ctx: ErrorContext) -> ErrorBoundary {
        ErrorBoundary {
            handler: Arc::clone(self),
            ctx,
        }
    }
}

#[async_trait]
impl Manager for ErrorHandler {
    fn name(&self) -> &str {
        "error_handler"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        *self.sink.write() = None;
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

// =============================================================================
// ErrorBoundary
// =============================================================================

/// Scoped wrapper routing any failure to the error handler with a declared
/// context. The error is recorded and then handed back to the caller.
pub struct ErrorBoundary {
    handler: Arc<ErrorHandler>,
    ctx: ErrorContext,
}

impl ErrorBoundary {
    /// Runs a closure, capturing any error it returns.
    pub fn run<T>(&self, f: impl FnOnce() -> Result<T, BoxError>) -> Result<T, BoxError> {
        f().inspect_err(|e| {
            self.handler.handle_error_with_trace(
                e.to_string(),
                format!("{e:?}"),
                self.ctx.clone(),
                Map::new(),
            );
        })
    }

    /// Runs a future, capturing any error it resolves to.
    pub async fn run_async<T>(
        &self,
        fut: impl Future<Output = Result<T, BoxError>>,
    ) -> Result<T, BoxError> {
        fut.await.inspect_err(|e| {
            self.handler.handle_error_with_trace(
                e.to_string(),
                format!("{e:?}"),
                self.ctx.clone(),
                Map::new(),
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_history_records_and_orders() {
        let handler = ErrorHandler::new();
        handler.handle_error("first", ErrorContext::new("test"), Map::new());
        handler.handle_error("second", ErrorContext::new("test"), Map::new());

        let history = handler.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "second");
        assert_eq!(history[1].message, "first");
    }

    #[test]
    fn test_exact_strategy_wins_over_prefix() {
        let handler = ErrorHandler::new();
        handler.register_strategy(
            StrategyMatcher::prefix("event_bus/"),
            Arc::new(|_| ErrorDisposition::Propagate),
        );
        handler.register_strategy(
            StrategyMatcher::exact("event_bus/sub-a"),
            Arc::new(|_| ErrorDisposition::Absorbed),
        );

        let info = handler.handle_error(
            "boom",
            ErrorContext::new("event_bus/sub-a"),
            Map::new(),
        );
        assert!(info.handled);

        let info = handler.handle_error(
            "boom",
            ErrorContext::new("event_bus/sub-b"),
            Map::new(),
        );
        assert!(!info.handled);
    }

    #[test]
    fn test_critical_escalates_unless_absorbed() {
        let handler = ErrorHandler::new();
        let mut critical = handler.take_critical_receiver().unwrap();

        handler.handle_error(
            "disk gone",
            ErrorContext::new("storage").severity(Severity::Critical),
            Map::new(),
        );
        assert!(critical.try_recv().is_ok());

        handler.register_strategy(
            StrategyMatcher::exact("storage"),
            Arc::new(|_| ErrorDisposition::Absorbed),
        );
        handler.handle_error(
            "disk gone again",
            ErrorContext::new("storage").severity(Severity::Critical),
            Map::new(),
        );
        assert!(critical.try_recv().is_err());
    }

    #[test]
    fn test_subscribers_notified() {
        let handler = ErrorHandler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        handler.register_subscriber(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        handler.handle_error("boom", ErrorContext::new("test"), Map::new());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_boundary_captures_and_returns_error() {
        let handler = Arc::new(ErrorHandler::new());
        let boundary = handler.boundary(
            ErrorContext::new("plugin_manager")
                .plugin("sample")
                .severity(Severity::High),
        );

        let result: Result<(), BoxError> = boundary.run(|| Err("plugin exploded".into()));
        assert!(result.is_err());

        let history = handler.history(1);
        assert_eq!(history[0].plugin_id.as_deref(), Some("sample"));
        assert_eq!(history[0].severity, Severity::High);
        assert!(history[0].traceback.is_some());
    }

    #[test]
    fn test_severity_filter() {
        let handler = ErrorHandler::new();
        handler.handle_error(
            "minor",
            ErrorContext::new("a").severity(Severity::Low),
            Map::new(),
        );
        handler.handle_error(
            "major",
            ErrorContext::new("b").severity(Severity::High),
            Map::new(),
        );

        let high = handler.history_by_severity(Severity::High, 10);
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].message, "major");
    }
}
