//! Hierarchical configuration: layered loading, dotted access, validation,
//! and change notification.

pub mod error;
pub mod loader;
pub mod schema;
pub mod service;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{
    ApiConfig, CoreConfig, DatabaseConfig, FileLogConfig, LOG_LEVELS, LogFormat, LoggingConfig,
    QorzenConfig, RotationKind, SecurityConfig,
};
pub use service::{ConfigListener, ConfigService, ConfigSnapshot, ListenerId};
pub use validation::{Constraint, ConstraintKind, default_constraints, validate_config};
