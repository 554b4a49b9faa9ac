//! Layered configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults → base file → profile
//! overlay file → prefixed environment variables. Environment variables use
//! the `QORZEN_` prefix (configurable) with `__` separating key segments:
//! `QORZEN_LOGGING__LEVEL=debug` → `logging.level = "debug"`. The
//! environment is read once per load; runtime writes go through
//! [`ConfigService::set`](super::service::ConfigService::set) on top of the
//! loaded snapshot.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Serialized};
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult};
use super::schema::QorzenConfig;
use super::validation::validate_config;

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "QORZEN_";

/// Configuration loader with support for files, profiles, and environment
/// overrides.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    profile: Option<String>,
    env_prefix: String,
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader with no file and the default env prefix.
    pub fn new() -> Self {
        Self {
            file: None,
            profile: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            search_paths: Vec::new(),
        }
    }

    /// Uses a specific configuration file.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Applies a profile overlay (`qorzen.<profile>.<ext>` next to the base
    /// file).
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Overrides the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Adds a search path for configuration files.
    pub fn add_search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.add_search_path(cwd)
        } else {
            self
        }
    }

    /// Adds the user config directory to search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.add_search_path(config_dir.join("qorzen"))
        } else {
            self
        }
    }

    /// Loads and validates the configuration from all layers.
    pub fn load(&self) -> ConfigResult<QorzenConfig> {
        let mut figment = Figment::from(Serialized::defaults(QorzenConfig::default()));

        let file = match &self.file {
            Some(file) => {
                if !file.exists() {
                    return Err(ConfigError::FileNotFound(file.clone()));
                }
                Some(file.clone())
            }
            None => self.find_config_file(),
        };

        if let Some(file) = &file {
            info!("Loading configuration from: {}", file.display());
            figment = merge_file(figment, file)?;
            if let Some(profile) = &self.profile {
                let overlay = profile_path(file, profile);
                if overlay.exists() {
                    debug!("Applying profile overlay: {}", overlay.display());
                    figment = merge_file(figment, &overlay)?;
                }
            }
        } else {
            info!("No configuration file found, using defaults");
        }

        figment = figment.merge(Env::prefixed(&self.env_prefix).split("__"));

        let config: QorzenConfig = figment.extract().map_err(ConfigError::from)?;
        validate_config(&config)?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        const CONFIG_NAMES: &[&str] = &[
            "qorzen.yaml",
            "qorzen.yml",
            "qorzen.json",
            "config.yaml",
            "config.yml",
            "config.json",
        ];

        for search_path in &self.search_paths {
            for name in CONFIG_NAMES {
                let path = search_path.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }
        None
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().with_current_dir().with_user_config_dir()
    }
}

fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match extension {
        #[cfg(feature = "json-config")]
        "json" => {
            use figment::providers::Format;
            Ok(figment.merge(figment::providers::Json::file(path)))
        }
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => {
            use figment::providers::Format;
            Ok(figment.merge(figment::providers::Yaml::file(path)))
        }
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn profile_path(base: &Path, profile: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("qorzen");
    let extension = base
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("yaml");
    base.with_file_name(format!("{stem}.{profile}.{extension}"))
}
