//! The configuration service.
//!
//! Readers observe an immutable snapshot (`Arc<ConfigSnapshot>`); writers
//! build a new snapshot and swap it in atomically. `set` validates the
//! declarative constraints for the key, re-validates the typed view, swaps,
//! notifies every listener whose registration prefix is a prefix of the
//! key, and emits `config/changed` — or does none of it.
//!
//! A failed [`load`](ConfigService::load) never replaces the current
//! snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use qorzen_core::bus::EventSink;
use qorzen_core::foundation::event::Event;
use qorzen_core::foundation::{BoxError, ConfigAccess};
use qorzen_core::manager::Manager;

use super::error::{ConfigError, ConfigResult};
use super::loader::ConfigLoader;
use super::schema::QorzenConfig;
use super::validation::{Constraint, default_constraints, evaluate_constraints, validate_config};

/// One immutable configuration snapshot: the typed view plus the raw tree
/// addressed by dotted keys.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Typed, validated view.
    pub typed: QorzenConfig,
    /// Raw tree for dotted lookup.
    pub tree: Value,
}

impl ConfigSnapshot {
    fn from_typed(typed: QorzenConfig) -> ConfigResult<Self> {
        let tree = serde_json::to_value(&typed)?;
        Ok(Self { typed, tree })
    }
}

/// Identifier of a registered listener.
pub type ListenerId = u64;

/// Change listener: receives the written key and the new value.
pub type ConfigListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

struct ListenerEntry {
    id: ListenerId,
    prefix: String,
    listener: ConfigListener,
}

/// The configuration manager.
pub struct ConfigService {
    loader: ConfigLoader,
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    listeners: RwLock<Vec<ListenerEntry>>,
    next_listener: AtomicU64,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    constraints: Vec<Constraint>,
    loaded: AtomicBool,
}

impl ConfigService {
    /// Creates the service with built-in defaults as the initial snapshot.
    pub fn new(loader: ConfigLoader) -> Self {
        let snapshot = ConfigSnapshot::from_typed(QorzenConfig::default())
            .expect("default config must serialize");
        Self {
            loader,
            snapshot: RwLock::new(Arc::new(snapshot)),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            sink: RwLock::new(None),
            constraints: default_constraints(),
            loaded: AtomicBool::new(false),
        }
    }

    /// Wires the event sink used for `config/changed` notifications.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Loads (or reloads) all configuration layers. On failure the current
    /// snapshot stays in place and the error is returned.
    pub fn load(&self) -> ConfigResult<()> {
        let typed = self.loader.load()?;
        let snapshot = Arc::new(ConfigSnapshot::from_typed(typed)?);
        *self.snapshot.write() = snapshot;
        self.loaded.store(true, Ordering::Release);
        info!("Configuration loaded");
        Ok(())
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// A clone of the typed view.
    pub fn typed(&self) -> QorzenConfig {
        self.snapshot().typed.clone()
    }

    /// Dotted lookup into the current snapshot.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        tree_get(&self.snapshot().tree, key).cloned()
    }

    /// Writes a dotted key.
    ///
    /// Atomic: either the new snapshot is installed and all matching
    /// listeners notified, or nothing changed.
    pub fn set_value(&self, key: &str, value: Value) -> ConfigResult<()> {
        evaluate_constraints(&self.constraints, key, &value)?;

        let new_snapshot = {
            let current = self.snapshot();
            let mut tree = current.tree.clone();
            tree_set(&mut tree, key, value.clone())?;
            let typed: QorzenConfig = serde_json::from_value(tree.clone())
                .map_err(|e| ConfigError::validation(e.to_string()))?;
            validate_config(&typed)?;
            Arc::new(ConfigSnapshot { typed, tree })
        };

        let matching: Vec<ConfigListener> = {
            let mut snapshot = self.snapshot.write();
            *snapshot = new_snapshot;
            // Collect while still exclusive so a racing unsubscribe cannot
            // observe the new value without having been notified.
            self.listeners
                .read()
                .iter()
                .filter(|entry| key.starts_with(entry.prefix.as_str()))
                .map(|entry| Arc::clone(&entry.listener))
                .collect()
        };

        for listener in matching {
            listener(key, &value);
        }

        debug!(key = %key, "Configuration updated");
        if let Some(sink) = self.sink.read().clone() {
            let _ = sink.try_publish(
                Event::builder("config/changed", "config")
                    .payload_entry("key", key)
                    .payload_entry("value", value)
                    .build(),
            );
        }
        Ok(())
    }

    /// Registers a change listener for a key prefix. An empty prefix
    /// matches every key.
    pub fn register_listener(
        &self,
        prefix: impl Into<String>,
        listener: ConfigListener,
    ) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push(ListenerEntry {
            id,
            prefix: prefix.into(),
            listener,
        });
        id
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }
}

impl ConfigAccess for ConfigService {
    fn get(&self, key: &str) -> Option<Value> {
        self.get_value(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), BoxError> {
        self.set_value(key, value).map_err(|e| Box::new(e) as BoxError)
    }
}

#[async_trait]
impl Manager for ConfigService {
    fn name(&self) -> &str {
        "config"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        if !self.loaded.load(Ordering::Acquire) {
            self.load()?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.listeners.write().clear();
        *self.sink.write() = None;
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

// =============================================================================
// Dotted-path tree access
// =============================================================================

fn tree_get<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    let mut node = tree;
    for segment in key.split('.') {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

fn tree_set(tree: &mut Value, key: &str, value: Value) -> ConfigResult<()> {
    let mut node = tree;
    let segments: Vec<&str> = key.split('.').collect();
    let (last, path) = segments.split_last().ok_or_else(|| ConfigError::BadKeyPath {
        key: key.to_string(),
    })?;

    for segment in path {
        let object = node.as_object_mut().ok_or_else(|| ConfigError::BadKeyPath {
            key: key.to_string(),
        })?;
        node = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    let object = node.as_object_mut().ok_or_else(|| ConfigError::BadKeyPath {
        key: key.to_string(),
    })?;
    object.insert(last.to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn service() -> ConfigService {
        ConfigService::new(ConfigLoader::new())
    }

    #[test]
    fn test_get_defaults() {
        let service = service();
        assert_eq!(service.get_value("logging.level"), Some(json!("info")));
        assert_eq!(service.get_value("missing.key"), None);
    }

    #[test]
    fn test_set_then_get() {
        let service = service();
        service.set_value("logging.level", json!("debug")).unwrap();
        assert_eq!(service.get_value("logging.level"), Some(json!("debug")));
    }

    #[test]
    fn test_set_plugin_overlay() {
        let service = service();
        service
            .set_value("plugins.sample.refresh_interval", json!(60))
            .unwrap();
        assert_eq!(
            service.get_value("plugins.sample.refresh_interval"),
            Some(json!(60))
        );
    }

    #[test]
    fn test_rejected_set_leaves_snapshot() {
        let service = service();
        let before = service.snapshot();
        assert!(service.set_value("logging.level", json!("loud")).is_err());
        let after = service.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_constraint_rejects_before_listeners() {
        let service = service();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        service.register_listener(
            "api",
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(service.set_value("api.port", json!(0)).is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_prefix_matching() {
        let service = service();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        service.register_listener(
            "logging",
            Arc::new(move |key, value| {
                assert_eq!(key, "logging.level");
                assert_eq!(value, &json!("debug"));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = Arc::clone(&hits);
        service.register_listener(
            "plugins",
            Arc::new(move |_, _| {
                counter.fetch_add(100, Ordering::SeqCst);
            }),
        );

        service.set_value("logging.level", json!("debug")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_listener() {
        let service = service();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = service.register_listener(
            "",
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(service.unregister_listener(id));
        assert!(!service.unregister_listener(id));

        service.set_value("logging.level", json!("debug")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tree_set_through_scalar_fails() {
        let service = service();
        // logging.level is a string; writing below it is a bad path.
        assert!(matches!(
            service.set_value("logging.level.deeper", json!(1)),
            Err(ConfigError::BadKeyPath { .. })
        ));
    }
}
