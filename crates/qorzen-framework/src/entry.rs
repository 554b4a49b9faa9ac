//! Plugin entry points.
//!
//! A manifest's `entry_point` is a hint resolved against the host's
//! [`EntryRegistry`]: hosts register a factory per entry-point name, and the
//! plugin manager instantiates the entry when the plugin loads. The entry's
//! methods take `&mut self` — the isolation layer guarantees calls are never
//! concurrent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use qorzen_core::bus::EventSink;
use qorzen_core::foundation::{BoxError, ConfigAccess};

/// Handles injected into a plugin at load time.
///
/// Plugins interact with the platform exclusively through these handles (and
/// the capability-gated API built on them); they never see the kernel.
pub struct PluginRuntimeContext {
    /// The plugin's own name.
    pub plugin: String,
    /// Configuration handle.
    pub config: Arc<dyn ConfigAccess>,
    /// Event sink.
    pub events: Arc<dyn EventSink>,
    /// The plugin's data directory.
    pub data_dir: PathBuf,
}

/// The code interface of a plugin.
pub trait PluginEntry: Send + 'static {
    /// Called once when the plugin loads.
    fn on_load(&mut self, _ctx: &PluginRuntimeContext) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called once when the plugin unloads.
    fn on_unload(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Invokes a named method with JSON arguments.
    fn call(&mut self, method: &str, args: Value) -> Result<Value, BoxError>;
}

/// Factory producing a fresh entry instance.
pub type EntryFactory = fn() -> Box<dyn PluginEntry>;

/// Host-side table of entry factories keyed by entry-point name.
#[derive(Default)]
pub struct EntryRegistry {
    factories: RwLock<HashMap<String, EntryFactory>>,
}

impl EntryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for an entry-point name.
    pub fn register(&self, entry_point: impl Into<String>, factory: EntryFactory) {
        self.factories.write().insert(entry_point.into(), factory);
    }

    /// Resolves an entry-point name.
    pub fn resolve(&self, entry_point: &str) -> Option<EntryFactory> {
        self.factories.read().get(entry_point).copied()
    }
}
