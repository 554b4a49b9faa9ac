//! Foundation layer: events, subscriptions, errors, and the config seam.

pub mod config;
pub mod error;
pub mod event;
pub mod subscription;

pub use config::ConfigAccess;
pub use error::{
    BoxError, EventBusError, EventBusResult, JobError, JobResult, ManagerError, ManagerResult,
    Severity, TaskError, TaskResult,
};
pub use event::{Event, EventBuilder, RESERVED_PREFIXES, is_reserved_type};
pub use subscription::{DeliveryMode, EventCallback, Subscription, TypePattern};
