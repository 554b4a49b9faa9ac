//! Priority task scheduling over the concurrency core.
//!
//! The [`TaskScheduler`] keeps one priority queue per execution target (CPU
//! pool, I/O pool, main thread). A dispatcher per target acquires a pool
//! slot, pops the highest-priority pending task (FIFO within a priority
//! level), and hands it to the matching pool. Category → target mapping:
//! `io` → I/O pool, `ui` → main thread, everything else → CPU pool.
//!
//! Timeouts are measured from submission: when one elapses the task's token
//! is cancelled and the task finalizes as `failed` with a timeout error.
//! Progress reports are republished as `monitoring/metrics` at a bounded
//! rate.

mod types;

pub use types::{
    TaskCategory, TaskFilter, TaskPriority, TaskProgress, TaskRecord, TaskSpec, TaskStatus,
};

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::EventSink;
use crate::concurrency::ConcurrencyManager;
use crate::foundation::error::{BoxError, TaskError, TaskResult};
use crate::foundation::event::Event;
use crate::manager::Manager;

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler tuning knobs, sourced from the `tasks` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Timeout applied to tasks that do not set one; `None` = unlimited.
    pub default_timeout_secs: Option<u64>,
    /// Minimum interval between `monitoring/metrics` progress events per task.
    pub progress_interval_ms: u64,
    /// Cap on the number of records a query returns.
    pub max_query: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: None,
            progress_interval_ms: 500,
            max_query: 1000,
        }
    }
}

// =============================================================================
// Task context
// =============================================================================

/// Handed to every task body; carries identity, cancellation, and progress
/// reporting.
pub struct TaskContext {
    task_id: Uuid,
    token: CancellationToken,
    entry: Arc<Mutex<TaskEntry>>,
    sink: Option<Arc<dyn EventSink>>,
    progress_interval: Duration,
}

impl TaskContext {
    /// The running task's id.
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Whether cancellation was requested. Long-running bodies poll this
    /// between units of work.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The task's cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Reports progress. `fraction` is clamped to `[0.0, 1.0]`; a
    /// `monitoring/metrics` event is emitted at most once per configured
    /// interval.
    pub fn report(&self, fraction: f64, message: Option<String>) {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut entry = self.entry.lock();
        if entry.record.status.is_terminal() {
            return;
        }
        entry.record.progress = TaskProgress {
            fraction,
            message: message.clone(),
        };

        let now = Instant::now();
        let due = entry
            .last_progress_emit
            .is_none_or(|last| now.duration_since(last) >= self.progress_interval);
        if !due {
            return;
        }
        entry.last_progress_emit = Some(now);
        let name = entry.record.name.clone();
        drop(entry);

        if let Some(sink) = &self.sink {
            let mut builder = Event::builder("monitoring/metrics", "task_scheduler")
                .payload_entry("task_id", self.task_id.to_string())
                .payload_entry("task", name)
                .payload_entry("progress", fraction);
            if let Some(message) = message {
                builder = builder.payload_entry("message", message);
            }
            let _ = sink.try_publish(builder.build());
        }
    }
}

/// A task body: synchronous work run on a pool thread.
pub type TaskFn = Box<dyn FnOnce(&TaskContext) -> Result<Value, BoxError> + Send + 'static>;

/// Handle returned by [`TaskScheduler::submit`]: the task id plus an
/// awaitable terminal record.
pub struct TaskHandle {
    /// The assigned task id.
    pub id: Uuid,
    receiver: oneshot::Receiver<TaskRecord>,
}

impl TaskHandle {
    /// Waits for the task to reach a terminal status.
    pub async fn wait(self) -> TaskResult<TaskRecord> {
        self.receiver.await.map_err(|_| TaskError::NotRunning)
    }
}

// =============================================================================
// Internals
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PoolTarget {
    Cpu,
    Io,
    Main,
}

impl PoolTarget {
    fn for_category(category: TaskCategory) -> Self {
        match category {
            TaskCategory::Io => Self::Io,
            TaskCategory::Ui => Self::Main,
            _ => Self::Cpu,
        }
    }
}

struct TaskEntry {
    record: TaskRecord,
    token: CancellationToken,
    last_progress_emit: Option<Instant>,
    done: Option<oneshot::Sender<TaskRecord>>,
}

struct QueuedTask {
    priority: TaskPriority,
    seq: u64,
    id: Uuid,
    job: TaskFn,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for QueuedTask {}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower sequence (FIFO).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TargetQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
    slots: Arc<Semaphore>,
}

impl TargetQueue {
    fn new(slots: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            slots: Arc::new(Semaphore::new(slots)),
        }
    }
}

// =============================================================================
// TaskScheduler
// =============================================================================

/// The shared task scheduler.
pub struct TaskScheduler {
    config: SchedulerConfig,
    concurrency: Arc<ConcurrencyManager>,
    records: Arc<RwLock<HashMap<Uuid, Arc<Mutex<TaskEntry>>>>>,
    queues: HashMap<PoolTarget, Arc<TargetQueue>>,
    sink: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
    seq: AtomicU64,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl TaskScheduler {
    /// Creates a scheduler over the given concurrency manager.
    pub fn new(config: SchedulerConfig, concurrency: Arc<ConcurrencyManager>) -> Self {
        let mut queues = HashMap::new();
        queues.insert(
            PoolTarget::Cpu,
            Arc::new(TargetQueue::new(concurrency.cpu_workers())),
        );
        queues.insert(
            PoolTarget::Io,
            Arc::new(TargetQueue::new(concurrency.io_workers())),
        );
        // The main thread is drained by an external pump; dispatch freely and
        // let the pump impose the actual serialization.
        queues.insert(PoolTarget::Main, Arc::new(TargetQueue::new(256)));

        Self {
            config,
            concurrency,
            records: Arc::new(RwLock::new(HashMap::new())),
            queues,
            sink: Arc::new(RwLock::new(None)),
            seq: AtomicU64::new(0),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Wires the event sink used for progress metrics.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Submits a task for execution.
    pub fn submit<F>(&self, spec: TaskSpec, job: F) -> TaskResult<TaskHandle>
    where
        F: FnOnce(&TaskContext) -> Result<Value, BoxError> + Send + 'static,
    {
        if !self.running.load(Ordering::Acquire) {
            return Err(TaskError::NotRunning);
        }

        let mut record = TaskRecord::from_spec(&spec);
        let id = record.id;
        record.status = TaskStatus::Pending;

        let token = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let entry = Arc::new(Mutex::new(TaskEntry {
            record,
            token: token.clone(),
            last_progress_emit: None,
            done: Some(done_tx),
        }));
        self.records.write().insert(id, Arc::clone(&entry));

        let timeout = spec
            .timeout
            .or(self.config.default_timeout_secs.map(Duration::from_secs));
        if let Some(timeout) = timeout {
            let entry = Arc::clone(&entry);
            let name = spec.name.clone();
            self.spawn_timeout(entry, name, timeout);
        }

        let target = PoolTarget::for_category(spec.category);
        let queue = &self.queues[&target];
        queue.heap.lock().push(QueuedTask {
            priority: spec.priority,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            id,
            job: Box::new(job),
        });
        queue.notify.notify_one();

        debug!(task = %spec.name, id = %id, priority = ?spec.priority, "Task submitted");
        Ok(TaskHandle {
            id,
            receiver: done_rx,
        })
    }

    fn spawn_timeout(&self, entry: Arc<Mutex<TaskEntry>>, name: String, timeout: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut guard = entry.lock();
            if guard.record.status.is_terminal() {
                return;
            }
            guard.token.cancel();
            let error = TaskError::Timeout {
                name,
                timeout_ms: timeout.as_millis() as u64,
            };
            warn!(task = %guard.record.name, "Task timed out");
            Self::finalize_locked(&mut guard, TaskStatus::Failed, None, Some(error.to_string()));
        });
    }

    /// Requests cancellation of a task.
    ///
    /// Pending tasks end in `cancelled` immediately; running tasks observe
    /// their token cooperatively. Non-cancellable tasks fail with
    /// [`TaskError::NotCancellable`].
    pub fn cancel(&self, id: Uuid) -> TaskResult<()> {
        let entry = self
            .records
            .read()
            .get(&id)
            .cloned()
            .ok_or(TaskError::NotFound { id })?;
        let mut guard = entry.lock();
        if !guard.record.cancellable {
            return Err(TaskError::NotCancellable { id });
        }
        if guard.record.status.is_terminal() {
            return Ok(());
        }
        guard.token.cancel();
        if guard.record.status == TaskStatus::Pending {
            Self::finalize_locked(
                &mut guard,
                TaskStatus::Cancelled,
                None,
                Some(TaskError::Cancelled.to_string()),
            );
        }
        Ok(())
    }

    /// Returns the record for a task.
    pub fn get_task(&self, id: Uuid) -> TaskResult<TaskRecord> {
        let entry = self
            .records
            .read()
            .get(&id)
            .cloned()
            .ok_or(TaskError::NotFound { id })?;
        let guard = entry.lock();
        Ok(guard.record.clone())
    }

    /// Returns a snapshot of tasks matching `filter`, newest first.
    pub fn get_tasks(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        let limit = filter.limit.unwrap_or(self.config.max_query).min(self.config.max_query);
        let entries: Vec<Arc<Mutex<TaskEntry>>> =
            self.records.read().values().cloned().collect();
        let mut records: Vec<TaskRecord> = entries
            .iter()
            .map(|e| e.lock().record.clone())
            .filter(|r| filter.matches(r))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        records
    }

    /// Sets a terminal status exactly once; later attempts are ignored.
    fn finalize_locked(
        entry: &mut TaskEntry,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) {
        if entry.record.status.is_terminal() {
            return;
        }
        entry.record.status = status;
        entry.record.result = result;
        entry.record.error = error;
        entry.record.finished_at = Some(Utc::now());
        if let Some(done) = entry.done.take() {
            let _ = done.send(entry.record.clone());
        }
    }

    async fn run_dispatcher(
        queue: Arc<TargetQueue>,
        target: PoolTarget,
        concurrency: Arc<ConcurrencyManager>,
        records: Arc<RwLock<HashMap<Uuid, Arc<Mutex<TaskEntry>>>>>,
        sink: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
        progress_interval: Duration,
        shutdown: CancellationToken,
    ) {
        loop {
            // One pool slot per in-flight task; priority applies to whatever
            // is queued when a slot frees up.
            let permit = tokio::select! {
                permit = Arc::clone(&queue.slots).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => return,
                },
                _ = shutdown.cancelled() => return,
            };

            let queued = loop {
                let notified = queue.notify.notified();
                if let Some(task) = queue.heap.lock().pop() {
                    break Some(task);
                }
                tokio::select! {
                    _ = notified => {}
                    _ = shutdown.cancelled() => break None,
                }
            };
            let Some(queued) = queued else { return };

            let Some(entry) = records.read().get(&queued.id).cloned() else {
                drop(permit);
                continue;
            };

            // Tasks cancelled (or timed out) while pending are skipped here.
            {
                let mut guard = entry.lock();
                if guard.record.status != TaskStatus::Pending {
                    drop(guard);
                    drop(permit);
                    continue;
                }
                guard.record.status = TaskStatus::Running;
                guard.record.started_at = Some(Utc::now());
            }

            let ctx = TaskContext {
                task_id: queued.id,
                token: entry.lock().token.clone(),
                entry: Arc::clone(&entry),
                sink: sink.read().clone(),
                progress_interval,
            };
            let job = queued.job;
            let run = move |_pool_token: &CancellationToken| {
                let outcome = job(&ctx);
                let mut guard = ctx.entry.lock();
                match outcome {
                    Ok(value) => {
                        Self::finalize_locked(&mut guard, TaskStatus::Completed, Some(value), None)
                    }
                    Err(e) if ctx.token.is_cancelled() => Self::finalize_locked(
                        &mut guard,
                        TaskStatus::Cancelled,
                        None,
                        Some(e.to_string()),
                    ),
                    Err(e) => Self::finalize_locked(
                        &mut guard,
                        TaskStatus::Failed,
                        None,
                        Some(TaskError::Failed(e.to_string()).to_string()),
                    ),
                }
                drop(permit);
            };

            match target {
                PoolTarget::Cpu => drop(concurrency.run_in_thread(run)),
                PoolTarget::Io => drop(concurrency.run_in_io(run)),
                PoolTarget::Main => drop(concurrency.run_on_main_thread(run)),
            }
        }
    }
}

#[async_trait]
impl Manager for TaskScheduler {
    fn name(&self) -> &str {
        "task_scheduler"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.running.store(true, Ordering::Release);
        for (target, queue) in &self.queues {
            tokio::spawn(Self::run_dispatcher(
                Arc::clone(queue),
                *target,
                Arc::clone(&self.concurrency),
                Arc::clone(&self.records),
                Arc::clone(&self.sink),
                Duration::from_millis(self.config.progress_interval_ms),
                self.shutdown.clone(),
            ));
        }
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::Release);
        self.shutdown.cancel();
        // Cancel whatever never started so waiting handles resolve.
        let entries: Vec<Arc<Mutex<TaskEntry>>> =
            self.records.read().values().cloned().collect();
        for entry in entries {
            let mut guard = entry.lock();
            if guard.record.status == TaskStatus::Pending {
                guard.token.cancel();
                Self::finalize_locked(
                    &mut guard,
                    TaskStatus::Cancelled,
                    None,
                    Some("scheduler shut down".to_string()),
                );
            }
        }
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}
