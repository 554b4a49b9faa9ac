//! Configuration validation.
//!
//! Two layers: structural validation of the typed config after every load,
//! and declarative per-key [`Constraint`]s evaluated on every write.

use serde_json::Value;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LOG_LEVELS, QorzenConfig};

/// Validates the entire typed configuration.
pub fn validate_config(config: &QorzenConfig) -> ConfigResult<()> {
    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::validation(format!(
            "invalid log level '{}'; valid values: {:?}",
            config.logging.level, LOG_LEVELS
        )));
    }

    if let Some(api) = &config.api {
        validate_port(api.port)?;
    }
    if let Some(database) = &config.database {
        validate_port(database.port)?;
    }

    if let Some(secret) = &config.security.jwt_secret
        && secret.len() < 32
    {
        return Err(ConfigError::validation(
            "security.jwt_secret must be at least 32 characters",
        ));
    }

    if config.event_bus.capacity == 0 {
        return Err(ConfigError::validation(
            "event_bus.capacity must be greater than 0",
        ));
    }
    if config.event_bus.workers == 0 {
        return Err(ConfigError::validation(
            "event_bus.workers must be greater than 0",
        ));
    }
    if config.concurrency.io_workers == 0 {
        return Err(ConfigError::validation(
            "concurrency.io_workers must be greater than 0",
        ));
    }
    if config.tasks.progress_interval_ms == 0 {
        return Err(ConfigError::validation(
            "tasks.progress_interval_ms must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_port(port: u16) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}

// =============================================================================
// Declarative constraints
// =============================================================================

/// The shape a constrained value must have.
#[derive(Debug, Clone)]
pub enum ConstraintKind {
    /// An integer within an inclusive range.
    IntRange {
        /// Minimum accepted value.
        min: i64,
        /// Maximum accepted value.
        max: i64,
    },
    /// A string of at least `min` characters.
    MinLen {
        /// Minimum length.
        min: usize,
    },
    /// A string drawn from a fixed set.
    OneOf {
        /// Accepted values.
        values: Vec<&'static str>,
    },
    /// A boolean.
    Bool,
}

/// A declarative per-key constraint, evaluated on every write to its key.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// The dotted key the constraint applies to.
    pub key: &'static str,
    /// The required shape.
    pub kind: ConstraintKind,
}

/// The platform's built-in constraints.
pub fn default_constraints() -> Vec<Constraint> {
    vec![
        Constraint {
            key: "api.port",
            kind: ConstraintKind::IntRange { min: 1, max: 65535 },
        },
        Constraint {
            key: "database.port",
            kind: ConstraintKind::IntRange { min: 1, max: 65535 },
        },
        Constraint {
            key: "security.jwt_secret",
            kind: ConstraintKind::MinLen { min: 32 },
        },
        Constraint {
            key: "logging.level",
            kind: ConstraintKind::OneOf {
                values: LOG_LEVELS.to_vec(),
            },
        },
        Constraint {
            key: "logging.console",
            kind: ConstraintKind::Bool,
        },
    ]
}

/// Evaluates every constraint registered for `key` against `value`.
pub fn evaluate_constraints(
    constraints: &[Constraint],
    key: &str,
    value: &Value,
) -> ConfigResult<()> {
    for constraint in constraints.iter().filter(|c| c.key == key) {
        check_constraint(constraint, value)?;
    }
    Ok(())
}

fn check_constraint(constraint: &Constraint, value: &Value) -> ConfigResult<()> {
    match &constraint.kind {
        ConstraintKind::IntRange { min, max } => {
            let number = value.as_i64().ok_or_else(|| {
                ConfigError::constraint(constraint.key, "expected an integer")
            })?;
            if number < *min || number > *max {
                return Err(ConfigError::constraint(
                    constraint.key,
                    format!("{number} outside [{min}, {max}]"),
                ));
            }
        }
        ConstraintKind::MinLen { min } => {
            let text = value.as_str().ok_or_else(|| {
                ConfigError::constraint(constraint.key, "expected a string")
            })?;
            if text.len() < *min {
                return Err(ConfigError::constraint(
                    constraint.key,
                    format!("length {} below minimum {min}", text.len()),
                ));
            }
        }
        ConstraintKind::OneOf { values } => {
            let text = value.as_str().ok_or_else(|| {
                ConfigError::constraint(constraint.key, "expected a string")
            })?;
            if !values.contains(&text) {
                return Err(ConfigError::constraint(
                    constraint.key,
                    format!("'{text}' not one of {values:?}"),
                ));
            }
        }
        ConstraintKind::Bool => {
            if !value.is_boolean() {
                return Err(ConfigError::constraint(constraint.key, "expected a boolean"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config_validates() {
        assert!(validate_config(&QorzenConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = QorzenConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = QorzenConfig::default();
        config.api = Some(super::super::schema::ApiConfig {
            host: "0.0.0.0".into(),
            port: 0,
        });
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPort(0))
        ));
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut config = QorzenConfig::default();
        config.security.jwt_secret = Some("short".to_string());
        assert!(validate_config(&config).is_err());

        config.security.jwt_secret = Some("x".repeat(32));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_port_constraint() {
        let constraints = default_constraints();
        assert!(evaluate_constraints(&constraints, "api.port", &json!(8080)).is_ok());
        assert!(evaluate_constraints(&constraints, "api.port", &json!(0)).is_err());
        assert!(evaluate_constraints(&constraints, "api.port", &json!(70000)).is_err());
        assert!(evaluate_constraints(&constraints, "api.port", &json!("8080")).is_err());
    }

    #[test]
    fn test_level_constraint() {
        let constraints = default_constraints();
        assert!(evaluate_constraints(&constraints, "logging.level", &json!("debug")).is_ok());
        assert!(evaluate_constraints(&constraints, "logging.level", &json!("loud")).is_err());
    }

    #[test]
    fn test_unconstrained_key_passes() {
        let constraints = default_constraints();
        assert!(
            evaluate_constraints(&constraints, "plugins.sample.anything", &json!(1)).is_ok()
        );
    }
}
