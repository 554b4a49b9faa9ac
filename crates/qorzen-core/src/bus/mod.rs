//! Topic-based asynchronous publish/subscribe.
//!
//! # Scheduling model
//!
//! Publications land in a bounded publish queue; a single dispatcher task
//! drains it and matches every event against the subscription index. Each
//! subscription owns a private FIFO drained by a dedicated worker task, so an
//! event stream from one publisher reaches each subscriber in publish order
//! while different subscribers run concurrently. A shared semaphore bounds
//! how many callbacks execute at once.
//!
//! # Delivery modes
//!
//! - [`DeliveryMode::Async`]: the callback always runs on a bus worker.
//! - [`DeliveryMode::Sync`]: during [`EventBus::publish_sync`] the callback
//!   runs inline on the publisher; ordinary publishes still go through the
//!   worker.
//!
//! [`EventBus::publish_sync`] returns only after every matching subscriber
//! has finished handling the event.
//!
//! # Failure semantics
//!
//! A subscriber error is captured, logged, and forwarded to the error
//! handler with severity `medium` and source `event_bus/<subscriber_id>`. It
//! never cancels delivery to sibling subscribers.

mod queue;

pub use queue::BackpressurePolicy;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error_handler::{ErrorContext, ErrorHandler};
use crate::foundation::error::{EventBusError, EventBusResult, Severity};
use crate::foundation::event::Event;
use crate::foundation::subscription::{DeliveryMode, EventCallback, Subscription, TypePattern};
use crate::manager::Manager;

use queue::{PublishQueue, PushOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Event bus tuning knobs, sourced from the `event_bus` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Publish queue capacity.
    pub capacity: usize,
    /// Maximum number of concurrently running callbacks.
    pub workers: usize,
    /// What `publish` does when the queue is full.
    pub backpressure: BackpressurePolicy,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 4,
            backpressure: BackpressurePolicy::default(),
        }
    }
}

// =============================================================================
// EventSink
// =============================================================================

/// Non-blocking publish handle.
///
/// Components that only emit events (error handler, log tap, plugin hooks)
/// hold an `Arc<dyn EventSink>` instead of the full bus.
pub trait EventSink: Send + Sync {
    /// Enqueues an event without waiting. May drop or reject when the bus is
    /// saturated or not running.
    fn try_publish(&self, event: Event) -> EventBusResult<()>;
}

// =============================================================================
// Internal delivery plumbing
// =============================================================================

struct Delivery {
    event: Arc<Event>,
    /// Present for synchronous publishes: signalled when the callback is done.
    done: Option<oneshot::Sender<()>>,
}

struct SubscriptionEntry {
    subscription: Subscription,
    sender: mpsc::UnboundedSender<Delivery>,
    /// Set on unsubscribe: the worker finishes the in-flight callback and
    /// discards the rest of its backlog.
    cancelled: Arc<AtomicBool>,
}

/// Statistics counters for monitoring.
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    /// Events accepted by `publish`/`publish_sync`.
    pub published: u64,
    /// Events evicted or rejected due to backpressure.
    pub dropped: u64,
    /// Current number of subscriptions.
    pub subscriptions: usize,
}

// =============================================================================
// EventBus
// =============================================================================

/// The platform event bus.
pub struct EventBus {
    config: EventBusConfig,
    queue: Arc<PublishQueue>,
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionEntry>>>,
    permits: Arc<Semaphore>,
    running: AtomicBool,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    errors: Arc<RwLock<Option<Arc<ErrorHandler>>>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    /// Creates a bus with the given configuration. Call
    /// [`initialize`](Manager::initialize) before publishing.
    pub fn new(config: EventBusConfig) -> Self {
        let capacity = config.capacity.max(1);
        let workers = config.workers.max(1);
        Self {
            queue: Arc::new(PublishQueue::new(capacity)),
            permits: Arc::new(Semaphore::new(workers)),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            dispatcher: Mutex::new(None),
            errors: Arc::new(RwLock::new(None)),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            config,
        }
    }

    /// Wires the error handler that receives subscriber failures.
    pub fn set_error_handler(&self, handler: Arc<ErrorHandler>) {
        *self.errors.write() = Some(handler);
    }

    /// Wraps an async closure into an [`EventCallback`].
    pub fn callback<F, Fut>(f: F) -> EventCallback
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), crate::foundation::error::BoxError>> + Send + 'static,
    {
        Arc::new(move |event| Box::pin(f(event)))
    }

    // ─── Subscription management ─────────────────────────────────────────────

    /// Registers a subscription. An existing subscription with the same id is
    /// replaced atomically.
    ///
    /// Must be called from within a tokio runtime; each subscription gets a
    /// dedicated drain task.
    pub fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        pattern: &str,
        filter: Option<Map<String, serde_json::Value>>,
        mode: DeliveryMode,
        callback: EventCallback,
    ) -> EventBusResult<()> {
        let subscriber_id = subscriber_id.into();
        let pattern = TypePattern::parse(pattern)?;
        let subscription = Subscription {
            subscriber_id: subscriber_id.clone(),
            pattern,
            filter,
            mode,
            callback,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = SubscriptionEntry {
            subscription: subscription.clone(),
            sender,
            cancelled: Arc::clone(&cancelled),
        };

        tokio::spawn(Self::drain_subscription(
            subscription,
            receiver,
            cancelled,
            Arc::clone(&self.permits),
            Arc::clone(&self.errors),
        ));

        let previous = self.subscriptions.write().insert(subscriber_id.clone(), entry);
        if let Some(previous) = previous {
            previous.cancelled.store(true, Ordering::Release);
            debug!(subscriber = %subscriber_id, "Subscription replaced");
        } else {
            debug!(subscriber = %subscriber_id, "Subscription registered");
        }
        Ok(())
    }

    /// Removes a subscription. In-flight callbacks already dispatched run to
    /// completion; nothing further is delivered. Returns `true` if the id was
    /// registered.
    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        match self.subscriptions.write().remove(subscriber_id) {
            Some(entry) => {
                entry.cancelled.store(true, Ordering::Release);
                debug!(subscriber = %subscriber_id, "Subscription removed");
                true
            }
            None => false,
        }
    }

    /// Returns the current number of subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Returns counters for monitoring.
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscriptions: self.subscription_count(),
        }
    }

    // ─── Publishing ──────────────────────────────────────────────────────────

    /// Publishes an event for asynchronous delivery.
    ///
    /// Applies the configured [`BackpressurePolicy`] when the queue is full:
    /// `block` waits, `drop-oldest` evicts the head, `reject` fails with
    /// [`EventBusError::QueueFull`]. Any overflow emits `monitoring/alert`.
    pub async fn publish(&self, event: Event) -> EventBusResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(EventBusError::NotRunning);
        }
        let event = Arc::new(event);
        match self.config.backpressure {
            BackpressurePolicy::Block => {
                self.queue.push_wait(event).await;
            }
            policy => match self.queue.push_now(event, policy) {
                PushOutcome::Pushed => {}
                PushOutcome::DroppedOldest => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    self.emit_overflow_alert("drop-oldest");
                }
                PushOutcome::Rejected => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    self.emit_overflow_alert("reject");
                    return Err(EventBusError::QueueFull {
                        capacity: self.queue.capacity(),
                    });
                }
            },
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Publishes an event and waits for every matching subscriber to finish.
    ///
    /// Subscriptions in [`DeliveryMode::Sync`] run inline on the caller;
    /// async-mode subscriptions are enqueued on their own FIFO (preserving
    /// their ordering) and awaited.
    pub async fn publish_sync(&self, event: Event) -> EventBusResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(EventBusError::NotRunning);
        }
        let event = Arc::new(event);
        self.published.fetch_add(1, Ordering::Relaxed);

        enum Target {
            Inline(String, EventCallback),
            Queued(oneshot::Receiver<()>),
        }

        let targets: Vec<Target> = {
            let subscriptions = self.subscriptions.read();
            subscriptions
                .values()
                .filter(|entry| {
                    !entry.cancelled.load(Ordering::Acquire)
                        && entry.subscription.matches(&event)
                })
                .filter_map(|entry| match entry.subscription.mode {
                    DeliveryMode::Sync => Some(Target::Inline(
                        entry.subscription.subscriber_id.clone(),
                        Arc::clone(&entry.subscription.callback),
                    )),
                    DeliveryMode::Async => {
                        let (done_tx, done_rx) = oneshot::channel();
                        entry
                            .sender
                            .send(Delivery {
                                event: Arc::clone(&event),
                                done: Some(done_tx),
                            })
                            .ok()
                            .map(|_| Target::Queued(done_rx))
                    }
                })
                .collect()
        };

        let mut pending = Vec::new();
        for target in targets {
            match target {
                Target::Inline(subscriber_id, callback) => {
                    if let Err(e) = callback(Arc::clone(&event)).await {
                        self.report_subscriber_error(&subscriber_id, &event, &*e);
                    }
                }
                Target::Queued(done_rx) => pending.push(done_rx),
            }
        }
        // A dropped sender just means the worker exited; nothing to wait for.
        future::join_all(pending).await;
        Ok(())
    }

    fn emit_overflow_alert(&self, policy: &str) {
        warn!(policy, "Event queue overflow");
        let alert = Event::builder("monitoring/alert", "event_bus")
            .payload_entry("alert", "queue_overflow")
            .payload_entry("policy", policy)
            .payload_entry("capacity", self.queue.capacity() as u64)
            .build();
        // The alert skips the capacity check so it cannot overflow itself.
        self.queue.push_unbounded(Arc::new(alert));
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    async fn run_dispatcher(
        queue: Arc<PublishQueue>,
        subscriptions: Arc<RwLock<HashMap<String, SubscriptionEntry>>>,
        shutdown: CancellationToken,
    ) {
        while let Some(event) = queue.pop(&shutdown).await {
            let subscriptions = subscriptions.read();
            for entry in subscriptions.values() {
                if entry.cancelled.load(Ordering::Acquire) {
                    continue;
                }
                if entry.subscription.matches(&event) {
                    let _ = entry.sender.send(Delivery {
                        event: Arc::clone(&event),
                        done: None,
                    });
                }
            }
        }
        debug!("Event dispatcher stopped");
    }

    async fn drain_subscription(
        subscription: Subscription,
        mut receiver: mpsc::UnboundedReceiver<Delivery>,
        cancelled: Arc<AtomicBool>,
        permits: Arc<Semaphore>,
        errors: Arc<RwLock<Option<Arc<ErrorHandler>>>>,
    ) {
        while let Some(delivery) = receiver.recv().await {
            if cancelled.load(Ordering::Acquire) {
                break;
            }
            let Ok(_permit) = permits.acquire().await else {
                break;
            };
            if let Err(e) = (subscription.callback)(Arc::clone(&delivery.event)).await {
                error!(
                    subscriber = %subscription.subscriber_id,
                    event_type = %delivery.event.event_type,
                    error      = %e,
                    "Subscriber callback failed"
                );
                if let Some(handler) = errors.read().clone() {
                    handler.handle_error(
                        format!("subscriber callback failed: {e}"),
                        ErrorContext {
                            source: format!("event_bus/{}", subscription.subscriber_id),
                            severity: Severity::Medium,
                            plugin_id: None,
                            component: Some("event_bus".to_string()),
                        },
                        Map::new(),
                    );
                }
            }
            if let Some(done) = delivery.done {
                let _ = done.send(());
            }
        }
    }

    fn report_subscriber_error(
        &self,
        subscriber_id: &str,
        event: &Event,
        error: &(dyn std::error::Error + Send + Sync),
    ) {
        error!(
            subscriber = %subscriber_id,
            event_type = %event.event_type,
            error      = %error,
            "Subscriber callback failed"
        );
        if let Some(handler) = self.errors.read().clone() {
            handler.handle_error(
                format!("subscriber callback failed: {error}"),
                ErrorContext {
                    source: format!("event_bus/{subscriber_id}"),
                    severity: Severity::Medium,
                    plugin_id: None,
                    component: Some("event_bus".to_string()),
                },
                Map::new(),
            );
        }
    }
}

impl EventSink for EventBus {
    fn try_publish(&self, event: Event) -> EventBusResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(EventBusError::NotRunning);
        }
        let policy = match self.config.backpressure {
            // Cannot wait in a sync context; fall back to rejecting.
            BackpressurePolicy::Block => BackpressurePolicy::Reject,
            other => other,
        };
        match self.queue.push_now(Arc::new(event), policy) {
            PushOutcome::Pushed => {
                self.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            PushOutcome::DroppedOldest => {
                self.published.fetch_add(1, Ordering::Relaxed);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            PushOutcome::Rejected => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(EventBusError::QueueFull {
                    capacity: self.queue.capacity(),
                })
            }
        }
    }
}

#[async_trait]
impl Manager for EventBus {
    fn name(&self) -> &str {
        "event_bus"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        let handle = tokio::spawn(Self::run_dispatcher(
            Arc::clone(&self.queue),
            Arc::clone(&self.subscriptions),
            self.shutdown.clone(),
        ));
        *self.dispatcher.lock() = Some(handle);
        self.running.store(true, Ordering::Release);
        debug!(
            capacity = self.config.capacity,
            workers = self.config.workers,
            "Event bus started"
        );
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::Release);
        self.shutdown.cancel();
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // Dropping the entries closes every per-subscription channel, letting
        // the drain tasks exit.
        self.subscriptions.write().clear();
        debug!("Event bus stopped");
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}
