//! Extension points: named interfaces plugins provide for one another.
//!
//! A provider declares points in its manifest; consumers register
//! implementations against a point, subject to a semver compatibility check
//! of the use-site range against the declared point version. Calling into
//! another plugin's extension point requires the `plugin.communicate`
//! capability, enforced at the plugin API surface.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use semver::Version;
use serde_json::Value;
use thiserror::Error;

use qorzen_core::foundation::BoxError;

use crate::manifest::{ExtensionPointDecl, ExtensionUse};

/// An extension point implementation supplied by a consumer plugin.
pub type ExtensionHandler = Arc<dyn Fn(Value) -> Result<Value, BoxError> + Send + Sync>;

/// Errors from extension point registration and invocation.
#[derive(Debug, Clone, Error)]
pub enum ExtensionError {
    /// No such point is declared.
    #[error("extension point '{provider}:{id}' does not exist")]
    UnknownPoint {
        /// The providing plugin.
        provider: String,
        /// The point id.
        id: String,
    },

    /// The use-site's accepted range excludes the declared point version.
    #[error("extension point '{provider}:{id}' is version {declared}, use requires {required}")]
    IncompatibleVersion {
        /// The providing plugin.
        provider: String,
        /// The point id.
        id: String,
        /// The declared interface version.
        declared: Version,
        /// The range the consumer requires.
        required: String,
    },

    /// No implementation registered by this consumer.
    #[error("no implementation of '{provider}:{id}' by '{consumer}'")]
    NoImplementation {
        /// The providing plugin.
        provider: String,
        /// The point id.
        id: String,
        /// The consumer plugin.
        consumer: String,
    },
}

struct PointEntry {
    version: Version,
    implementations: HashMap<String, ExtensionHandler>,
}

/// The live table of declared extension points and registered
/// implementations.
#[derive(Default)]
pub struct ExtensionRegistry {
    points: RwLock<HashMap<(String, String), PointEntry>>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a provider's extension point (idempotent per declaration).
    pub fn declare(&self, provider: &str, decl: &ExtensionPointDecl) {
        self.points.write().insert(
            (provider.to_string(), decl.id.clone()),
            PointEntry {
                version: decl.version.clone(),
                implementations: HashMap::new(),
            },
        );
    }

    /// Removes every point a provider declared (on unload/uninstall).
    pub fn revoke_provider(&self, provider: &str) {
        self.points
            .write()
            .retain(|(p, _), _| p != provider);
    }

    /// Removes a consumer's implementations everywhere (on unload).
    pub fn remove_consumer(&self, consumer: &str) {
        for entry in self.points.write().values_mut() {
            entry.implementations.remove(consumer);
        }
    }

    /// Registers a consumer's implementation against a declared point,
    /// checking version compatibility.
    pub fn register_use(
        &self,
        consumer: &str,
        use_site: &ExtensionUse,
        handler: ExtensionHandler,
    ) -> Result<(), ExtensionError> {
        let mut points = self.points.write();
        let entry = points
            .get_mut(&(use_site.provider.clone(), use_site.id.clone()))
            .ok_or_else(|| ExtensionError::UnknownPoint {
                provider: use_site.provider.clone(),
                id: use_site.id.clone(),
            })?;
        if !use_site.range.matches(&entry.version) {
            return Err(ExtensionError::IncompatibleVersion {
                provider: use_site.provider.clone(),
                id: use_site.id.clone(),
                declared: entry.version.clone(),
                required: use_site.range.to_string(),
            });
        }
        entry
            .implementations
            .insert(consumer.to_string(), handler);
        Ok(())
    }

    /// Invokes one consumer's implementation of a point.
    pub fn invoke(
        &self,
        provider: &str,
        id: &str,
        consumer: &str,
        args: Value,
    ) -> Result<Result<Value, BoxError>, ExtensionError> {
        let handler = {
            let points = self.points.read();
            let entry = points
                .get(&(provider.to_string(), id.to_string()))
                .ok_or_else(|| ExtensionError::UnknownPoint {
                    provider: provider.to_string(),
                    id: id.to_string(),
                })?;
            entry
                .implementations
                .get(consumer)
                .cloned()
                .ok_or_else(|| ExtensionError::NoImplementation {
                    provider: provider.to_string(),
                    id: id.to_string(),
                    consumer: consumer.to_string(),
                })?
        };
        Ok(handler(args))
    }

    /// The consumers implementing a point.
    pub fn implementors(&self, provider: &str, id: &str) -> Vec<String> {
        self.points
            .read()
            .get(&(provider.to_string(), id.to_string()))
            .map(|entry| entry.implementations.keys().cloned().collect())
            .unwrap_or_default()
    }
}
