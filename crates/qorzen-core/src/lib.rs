//! # Qorzen Core
//!
//! The core engine of the Qorzen platform: a microkernel-style runtime that
//! hosts cooperating *managers* and, above them, a population of plugins.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! - **Events**: immutable publish/subscribe records ([`Event`])
//! - **Subscriptions**: patterns, filters, delivery modes ([`Subscription`])
//! - **Errors**: per-subsystem taxonomies and [`Severity`]
//! - **Config seam**: [`ConfigAccess`] implemented by the runtime
//!
//! ### Dispatch Layer
//!
//! - **Event Bus**: bounded queue, wildcard/filter routing, sync + async
//!   delivery ([`EventBus`])
//! - **Concurrency**: CPU/I-O pools, main-thread pump, cancellation
//!   ([`ConcurrencyManager`])
//! - **Task Scheduler**: priority queue, progress, timeouts
//!   ([`TaskScheduler`])
//!
//! ### Kernel Layer
//!
//! - **Managers**: init/shutdown lifecycle in dependency order
//!   ([`Manager`], [`ManagerRegistry`])
//! - **Error Handler**: classified capture, strategies, boundaries
//!   ([`ErrorHandler`])
//!
//! All cross-component notification goes through the bus; managers never
//! hold long-lived references to one another.

pub mod bus;
pub mod concurrency;
pub mod error_handler;
pub mod foundation;
pub mod manager;
pub mod task;

// Re-export foundation types
pub use foundation::{
    BoxError, ConfigAccess, DeliveryMode, Event, EventBuilder, EventBusError, EventBusResult,
    EventCallback, JobError, JobResult, ManagerError, ManagerResult, RESERVED_PREFIXES, Severity,
    Subscription, TaskError, TaskResult, TypePattern, is_reserved_type,
};

// Re-export dispatch types
pub use bus::{BackpressurePolicy, BusStats, EventBus, EventBusConfig, EventSink};
pub use concurrency::{ConcurrencyConfig, ConcurrencyManager, JobHandle, MainThreadQueue};
pub use task::{
    SchedulerConfig, TaskCategory, TaskContext, TaskFilter, TaskHandle, TaskPriority,
    TaskProgress, TaskRecord, TaskScheduler, TaskSpec, TaskStatus,
};

// Re-export kernel types
pub use error_handler::{
    ErrorBoundary, ErrorContext, ErrorDisposition, ErrorHandler, ErrorInfo, ErrorStrategy,
    ErrorSubscriber, StrategyMatcher,
};
pub use manager::{Manager, ManagerRegistry, ManagerState, topological_layers};

/// Prelude for common imports.
pub mod prelude {
    pub use super::bus::{EventBus, EventBusConfig, EventSink};
    pub use super::error_handler::{ErrorContext, ErrorHandler};
    pub use super::foundation::*;
    pub use super::manager::{Manager, ManagerRegistry};
    pub use super::task::{TaskScheduler, TaskSpec};
}
