//! Configuration access seam.
//!
//! The concrete configuration service lives in `qorzen-runtime`; core and
//! framework components talk to it through [`ConfigAccess`] so that plugin
//! hooks, capability-gated APIs, and managers never depend on the runtime
//! crate. Consumers look the service up by handle, never hold references to
//! its internals.

use serde_json::Value;

use super::error::BoxError;

/// Dotted-key read/write access to the active configuration snapshot.
///
/// Implementations must make `set` atomic: either the value is stored and
/// every matching listener notified, or neither happens.
pub trait ConfigAccess: Send + Sync {
    /// Looks up a dotted key (`database.host`). `None` when absent.
    fn get(&self, key: &str) -> Option<Value>;

    /// Writes a dotted key into the active snapshot and notifies listeners.
    fn set(&self, key: &str, value: Value) -> Result<(), BoxError>;

    /// Looks up a dotted key, falling back to `default`.
    fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }
}
