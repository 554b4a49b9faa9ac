//! Configuration schema definitions.
//!
//! The recognized top-level sections and their effects:
//!
//! | Key           | Effect                                              |
//! |---------------|-----------------------------------------------------|
//! | `core`        | Kernel options (plugin dirs, isolation defaults)    |
//! | `logging`     | Level, format, file path, rotation                  |
//! | `event_bus`   | Queue capacity, backpressure policy, worker count   |
//! | `concurrency` | CPU pool size, I/O pool size, main thread enabled   |
//! | `tasks`       | Default timeout, progress report interval           |
//! | `security`    | JWT secret and TTLs (consumed by the API surface)   |
//! | `api`         | Bind address for the external API surface           |
//! | `database`    | Connection settings for the database layer          |
//! | `plugins.<id>`| Per-plugin configuration overlay                    |
//!
//! # Example Configuration (YAML)
//!
//! ```yaml
//! logging:
//!   level: debug
//!
//! event_bus:
//!   capacity: 2048
//!   backpressure: block
//!
//! plugins:
//!   sample:
//!     refresh_interval: 60
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use qorzen_core::bus::EventBusConfig;
use qorzen_core::concurrency::ConcurrencyConfig;
use qorzen_core::task::SchedulerConfig;
use qorzen_framework::isolation::{IsolationMode, ResourceLimits};

// =============================================================================
// Root Configuration
// =============================================================================

/// Root configuration structure for the platform.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QorzenConfig {
    /// Kernel options.
    pub core: CoreConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Event bus tuning.
    pub event_bus: EventBusConfig,

    /// Worker pool sizing.
    pub concurrency: ConcurrencyConfig,

    /// Task scheduler tuning.
    pub tasks: SchedulerConfig,

    /// Security settings, validated here and consumed by the API surface.
    pub security: SecurityConfig,

    /// External API surface settings, when present.
    pub api: Option<ApiConfig>,

    /// Database settings, when present.
    pub database: Option<DatabaseConfig>,

    /// Per-plugin configuration overlays, keyed by plugin name.
    pub plugins: BTreeMap<String, Value>,
}

impl QorzenConfig {
    /// Extracts one plugin's overlay, or an empty object when absent.
    pub fn plugin_overlay(&self, name: &str) -> Value {
        self.plugins
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }
}

// =============================================================================
// Core / kernel
// =============================================================================

/// Kernel options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Root directory for plugin installs, data, and the registry file.
    pub plugins_root: PathBuf,

    /// Extra directories scanned for plugins at startup.
    pub plugin_dirs: Vec<PathBuf>,

    /// Isolation mode applied to plugins.
    pub isolation: IsolationMode,

    /// Advisory per-plugin resource limits.
    pub resource_limits: ResourceLimits,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            plugins_root: PathBuf::from("plugins"),
            plugin_dirs: Vec::new(),
            isolation: IsolationMode::default(),
            resource_limits: ResourceLimits::default(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log levels recognized in configuration.
pub const LOG_LEVELS: &[&str] = &["debug", "info", "warning", "error", "critical"];

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Threshold level: one of [`LOG_LEVELS`].
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Whether to log to the console.
    pub console: bool,

    /// Rotating file output, when configured.
    pub file: Option<FileLogConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            console: true,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Maps the configured level onto a `tracing` level filter directive.
    pub fn tracing_directive(&self) -> &'static str {
        match self.level.as_str() {
            "debug" => "debug",
            "warning" => "warn",
            "error" | "critical" => "error",
            _ => "info",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON lines (requires the `json-log` feature).
    Json,
}

/// Rotating file output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    /// Directory the log files are written into.
    pub directory: PathBuf,

    /// File name prefix.
    pub prefix: String,

    /// Rotation cadence.
    pub rotation: RotationKind,

    /// Number of rotated files to keep.
    pub max_files: usize,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            prefix: "qorzen".to_string(),
            rotation: RotationKind::Daily,
            max_files: 5,
        }
    }
}

/// File rotation cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationKind {
    Hourly,
    #[default]
    Daily,
    Never,
}

// =============================================================================
// Security / API / database
// =============================================================================

/// Security settings. Validated by the core; consumed by the external API
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// JWT signing secret; at least 32 characters when present.
    pub jwt_secret: Option<String>,

    /// Access token lifetime in seconds.
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds.
    pub refresh_token_ttl_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 7 * 24 * 3600,
        }
    }
}

/// External API surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind host.
    pub host: String,

    /// Bind port (1-65535).
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Server host.
    pub host: String,

    /// Server port (1-65535).
    pub port: u16,

    /// Database name.
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "qorzen".to_string(),
        }
    }
}
