//! Unified error types for the Qorzen core.
//!
//! Each subsystem gets its own `thiserror` enum plus a `Result` alias.
//! Plugin-layer errors (manifest, resolution, lifecycle) live in
//! `qorzen-framework`; configuration errors live in `qorzen-runtime`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error type used at callback boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Severity
// =============================================================================

/// Severity of a captured error, used for routing and for the
/// `error/<severity>` event type segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Lowercase name, as used in event types (`error/critical`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Event Bus Errors
// =============================================================================

/// Errors that can occur in event bus operations.
#[derive(Debug, Clone, Error)]
pub enum EventBusError {
    /// The publish queue is at capacity and the backpressure policy is
    /// `reject`.
    #[error("event queue full (capacity {capacity})")]
    QueueFull {
        /// The configured queue capacity.
        capacity: usize,
    },

    /// The bus is shut down.
    #[error("event bus is not running")]
    NotRunning,

    /// Pattern string with a `*` anywhere but the end, or empty.
    #[error("invalid type pattern: '{pattern}'")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
    },

    /// An event type violates namespace rules for the publisher.
    #[error("event type '{event_type}' is not allowed for publisher '{publisher}'")]
    TypeNotAllowed {
        /// The offending event type.
        event_type: String,
        /// The publisher that attempted it.
        publisher: String,
    },
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

// =============================================================================
// Concurrency Errors
// =============================================================================

/// Errors produced by worker pool jobs.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The job was cancelled before or while running.
    #[error("job cancelled")]
    Cancelled,

    /// The job panicked; the payload is the panic message when printable.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The owning pool shut down before the job produced a result.
    #[error("worker pool closed")]
    PoolClosed,
}

/// Result type for worker pool jobs.
pub type JobResult<T> = Result<T, JobError>;

// =============================================================================
// Task Scheduler Errors
// =============================================================================

/// Errors from the task scheduler.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task's configured timeout elapsed.
    #[error("task '{name}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Display name of the task.
        name: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Cancellation was requested on a task with `cancellable = false`.
    #[error("task '{id}' is not cancellable")]
    NotCancellable {
        /// The task id.
        id: uuid::Uuid,
    },

    /// No task with the given id.
    #[error("task '{id}' not found")]
    NotFound {
        /// The task id.
        id: uuid::Uuid,
    },

    /// The task body returned an error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task was cancelled.
    #[error("task cancelled")]
    Cancelled,

    /// The scheduler is not running.
    #[error("task scheduler is not running")]
    NotRunning,
}

/// Result type for scheduler operations.
pub type TaskResult<T> = Result<T, TaskError>;

// =============================================================================
// Manager / Kernel Errors
// =============================================================================

/// Errors from manager registration and lifecycle.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Registering the manager would close a dependency cycle.
    #[error("dependency cycle involving managers: {names:?}")]
    DependencyCycle {
        /// Managers participating in the cycle.
        names: Vec<String>,
    },

    /// A declared dependency names no registered manager.
    #[error("manager '{manager}' depends on unknown manager '{dependency}'")]
    UnknownDependency {
        /// The declaring manager.
        manager: String,
        /// The missing dependency.
        dependency: String,
    },

    /// A manager with the same name is already registered.
    #[error("manager '{name}' is already registered")]
    AlreadyRegistered {
        /// The duplicate name.
        name: String,
    },

    /// No manager with the given name.
    #[error("manager '{name}' not found")]
    NotFound {
        /// The missing name.
        name: String,
    },

    /// The manager exists but is not of the requested type.
    #[error("manager '{name}' does not have the requested type")]
    WrongType {
        /// The looked-up name.
        name: String,
    },

    /// `initialize` returned an error.
    #[error("manager '{manager}' failed to initialize: {message}")]
    InitFailed {
        /// The failing manager.
        manager: String,
        /// The underlying error, stringified.
        message: String,
    },

    /// The manager was never initialized because an upstream dependency
    /// failed.
    #[error("manager '{manager}' blocked by failed dependency '{dependency}'")]
    Blocked {
        /// The blocked manager.
        manager: String,
        /// The dependency whose init failed.
        dependency: String,
    },

    /// `shutdown` returned an error. Collected, never aborts the sweep.
    #[error("manager '{manager}' failed to shut down: {message}")]
    ShutdownFailed {
        /// The failing manager.
        manager: String,
        /// The underlying error, stringified.
        message: String,
    },
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;
