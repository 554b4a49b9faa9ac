//! # Qorzen Runtime
//!
//! Orchestration layer for the Qorzen platform: the configuration service,
//! the logging sink, and the [`Kernel`] that boots the managers in
//! dependency order and tears them down in reverse.
//!
//! ```rust,ignore
//! use qorzen_runtime::Kernel;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let kernel = Kernel::builder()
//!         .with_config_file("qorzen.yaml")
//!         .register_entry("sample", sample_entry)
//!         .build()?;
//!     kernel.run().await
//! }
//! ```

pub mod config;
pub mod kernel;
pub mod logging;

pub use config::{
    ConfigError, ConfigListener, ConfigLoader, ConfigResult, ConfigService, ConfigSnapshot,
    ListenerId, QorzenConfig,
};
pub use kernel::{Kernel, KernelBuilder, core_version};
pub use logging::{BusTapLayer, BusTapSlot, LoggingBuilder, LoggingHandle, LoggingManager};
