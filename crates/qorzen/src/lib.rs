//! # Qorzen
//!
//! A microkernel-style application platform: a small core of cooperating
//! *managers* — configuration, logging, event bus, concurrency, task
//! scheduling, error handling — hosting a population of dynamically
//! installed, capability-checked, isolated *plugins*.
//!
//! This crate is the facade: it re-exports the three layers.
//!
//! - [`qorzen_core`] — events, bus, worker pools, scheduler, manager kernel
//! - [`qorzen_framework`] — manifests, capabilities, lifecycle, isolation
//! - [`qorzen_runtime`] — config service, logging sink, the [`Kernel`]
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use qorzen::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let kernel = Kernel::builder()
//!         .with_config_file("qorzen.yaml")
//!         .build()?;
//!     kernel.run().await
//! }
//! ```

pub use qorzen_core as core;
pub use qorzen_framework as framework;
pub use qorzen_runtime as runtime;

pub use qorzen_core::{
    BackpressurePolicy, DeliveryMode, Event, EventBus, EventBusConfig, EventSink, ManagerRegistry,
    Severity, TaskCategory, TaskPriority, TaskScheduler, TaskSpec, TaskStatus,
};
pub use qorzen_framework::{
    Capability, CapabilitySet, IsolationMode, PluginEntry, PluginManager, PluginManifest,
    PluginState,
};
pub use qorzen_runtime::{ConfigService, Kernel, KernelBuilder, QorzenConfig};

/// Prelude for common imports.
pub mod prelude {
    pub use qorzen_core::prelude::*;
    pub use qorzen_framework::prelude::*;
    pub use qorzen_runtime::{ConfigLoader, ConfigService, Kernel, KernelBuilder};
}
