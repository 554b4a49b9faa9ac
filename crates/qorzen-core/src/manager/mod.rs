//! Manager trait and the dependency-ordered registry.
//!
//! A *manager* is a long-lived core service with an init/shutdown lifecycle.
//! The [`ManagerRegistry`] owns the dependency graph over managers and drives
//! bring-up in topological order and shutdown in reverse. A manager whose
//! init fails marks every transitive dependent as blocked and aborts further
//! bring-up; shutdown is best-effort and collects all errors.
//!
//! Managers never hold long-lived references to each other — consumers look
//! collaborators up by name through the registry (or the kernel facade) at
//! the call site.

pub mod graph;

pub use graph::{topological_layers, transitive_dependents};

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::foundation::error::{ManagerError, ManagerResult};

// =============================================================================
// Manager trait
// =============================================================================

/// A long-lived core service managed by the kernel.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// Unique manager name (registry key and dependency target).
    fn name(&self) -> &str;

    /// Brings the manager up. Called once, after every declared dependency
    /// has initialized.
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Takes the manager down. Called before any of its dependencies are
    /// shut down.
    async fn shutdown(&self) -> anyhow::Result<()>;

    /// Liveness flag for health reporting.
    fn healthy(&self) -> bool {
        true
    }

    /// Upcast for typed lookup via [`ManagerRegistry::get_as`].
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Lifecycle state of a registered manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Registered, not yet initialized.
    Registered,
    /// `initialize` returned successfully.
    Initialized,
    /// Never initialized because an upstream dependency failed.
    Blocked,
    /// `initialize` returned an error.
    Failed,
    /// `shutdown` has run (successfully or not).
    ShutDown,
}

struct ManagerNode {
    manager: Arc<dyn Manager>,
    deps: Vec<String>,
    state: ManagerState,
}

// =============================================================================
// ManagerRegistry
// =============================================================================

/// Dependency-ordered registry of managers.
#[derive(Default)]
pub struct ManagerRegistry {
    nodes: RwLock<BTreeMap<String, ManagerNode>>,
}

impl ManagerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a manager with its declared dependencies.
    ///
    /// Fails with [`ManagerError::DependencyCycle`] if the addition would
    /// close a cycle; the registry is left unchanged in that case.
    pub fn register(
        &self,
        manager: Arc<dyn Manager>,
        deps: Vec<String>,
    ) -> ManagerResult<()> {
        let name = manager.name().to_string();
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&name) {
            return Err(ManagerError::AlreadyRegistered { name });
        }

        nodes.insert(
            name.clone(),
            ManagerNode {
                manager,
                deps,
                state: ManagerState::Registered,
            },
        );

        let dep_map: BTreeMap<String, Vec<String>> = nodes
            .iter()
            .map(|(n, node)| (n.clone(), node.deps.clone()))
            .collect();
        if let Err(cycle) = topological_layers(&dep_map) {
            nodes.remove(&name);
            return Err(ManagerError::DependencyCycle { names: cycle });
        }

        info!(manager = %name, "Manager registered");
        Ok(())
    }

    /// Removes a manager by name. `register` followed by `deregister` leaves
    /// the registry as it was.
    pub fn deregister(&self, name: &str) -> bool {
        self.nodes.write().remove(name).is_some()
    }

    /// Returns the number of registered managers.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Returns `true` when no managers are registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Looks a manager up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Manager>> {
        self.nodes.read().get(name).map(|n| Arc::clone(&n.manager))
    }

    /// Looks a manager up by name and downcasts it to its concrete type.
    pub fn get_as<M: Manager>(&self, name: &str) -> ManagerResult<Arc<M>> {
        let manager = self.get(name).ok_or_else(|| ManagerError::NotFound {
            name: name.to_string(),
        })?;
        manager
            .as_any()
            .downcast::<M>()
            .map_err(|_| ManagerError::WrongType {
                name: name.to_string(),
            })
    }

    /// Returns each manager's lifecycle state.
    pub fn states(&self) -> BTreeMap<String, ManagerState> {
        self.nodes
            .read()
            .iter()
            .map(|(name, node)| (name.clone(), node.state))
            .collect()
    }

    /// Returns each manager's health flag.
    pub fn health(&self) -> BTreeMap<String, bool> {
        self.nodes
            .read()
            .iter()
            .map(|(name, node)| (name.clone(), node.manager.healthy()))
            .collect()
    }

    fn dep_map(&self) -> BTreeMap<String, Vec<String>> {
        self.nodes
            .read()
            .iter()
            .map(|(n, node)| (n.clone(), node.deps.clone()))
            .collect()
    }

    fn set_state(&self, name: &str, state: ManagerState) {
        if let Some(node) = self.nodes.write().get_mut(name) {
            node.state = state;
        }
    }

    /// Initializes all managers in dependency order.
    ///
    /// On the first failure the failing manager is marked `Failed`, every
    /// transitive dependent is marked `Blocked`, bring-up aborts, and the
    /// error is returned. Managers initialized before the failure stay up.
    pub async fn initialize_all(&self) -> ManagerResult<()> {
        let dep_map = self.dep_map();

        // Every declared dependency must name a registered manager.
        for (name, deps) in &dep_map {
            for dep in deps {
                if !dep_map.contains_key(dep) {
                    return Err(ManagerError::UnknownDependency {
                        manager: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let layers = topological_layers(&dep_map)
            .map_err(|cycle| ManagerError::DependencyCycle { names: cycle })?;

        for name in layers.into_iter().flatten() {
            let (manager, state) = {
                let nodes = self.nodes.read();
                let Some(node) = nodes.get(&name) else { continue };
                (Arc::clone(&node.manager), node.state)
            };
            if state != ManagerState::Registered {
                continue;
            }

            match manager.initialize().await {
                Ok(()) => {
                    self.set_state(&name, ManagerState::Initialized);
                    info!(manager = %name, "Manager initialized");
                }
                Err(e) => {
                    error!(manager = %name, error = %e, "Manager failed to initialize");
                    self.set_state(&name, ManagerState::Failed);
                    for dependent in transitive_dependents(&dep_map, &name) {
                        warn!(
                            manager = %dependent,
                            failed_dependency = %name,
                            "Manager blocked by failed dependency"
                        );
                        self.set_state(&dependent, ManagerState::Blocked);
                    }
                    return Err(ManagerError::InitFailed {
                        manager: name,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Shuts all initialized managers down in reverse dependency order.
    ///
    /// A failing shutdown never aborts the sweep; every error is collected
    /// and returned.
    pub async fn shutdown_all(&self) -> Vec<ManagerError> {
        let dep_map = self.dep_map();
        let layers = match topological_layers(&dep_map) {
            Ok(layers) => layers,
            Err(cycle) => {
                // Cannot happen for a graph that passed registration, but a
                // best-effort sweep still beats doing nothing.
                error!(cycle = ?cycle, "Dependency cycle during shutdown; sweeping unordered");
                vec![dep_map.keys().cloned().collect()]
            }
        };

        let mut errors = Vec::new();
        for name in layers.into_iter().rev().flat_map(|mut l| {
            l.reverse();
            l
        }) {
            let manager = {
                let nodes = self.nodes.read();
                match nodes.get(&name) {
                    Some(node) if node.state == ManagerState::Initialized => {
                        Arc::clone(&node.manager)
                    }
                    _ => continue,
                }
            };

            if let Err(e) = manager.shutdown().await {
                error!(manager = %name, error = %e, "Manager failed to shut down");
                errors.push(ManagerError::ShutdownFailed {
                    manager: name.clone(),
                    message: e.to_string(),
                });
            } else {
                info!(manager = %name, "Manager shut down");
            }
            self.set_state(&name, ManagerState::ShutDown);
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingManager {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
    }

    #[async_trait]
    impl Manager for RecordingManager {
        fn name(&self) -> &str {
            &self.name
        }

        async fn initialize(&self) -> anyhow::Result<()> {
            if self.fail_init {
                anyhow::bail!("induced failure");
            }
            self.log.lock().push(format!("init:{}", self.name));
            Ok(())
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("stop:{}", self.name));
            Ok(())
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn manager(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<RecordingManager> {
        Arc::new(RecordingManager {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_init: false,
        })
    }

    #[tokio::test]
    async fn test_init_order_respects_dependencies() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ManagerRegistry::new();
        registry
            .register(manager("scheduler", &log), vec!["bus".into()])
            .unwrap();
        registry.register(manager("bus", &log), vec!["config".into()]).unwrap();
        registry.register(manager("config", &log), vec![]).unwrap();

        registry.initialize_all().await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["init:config", "init:bus", "init:scheduler"]
        );

        registry.shutdown_all().await;
        assert_eq!(
            log.lock()[3..],
            ["stop:scheduler", "stop:bus", "stop:config"]
        );
    }

    #[tokio::test]
    async fn test_cycle_rejected_at_registration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ManagerRegistry::new();
        registry.register(manager("a", &log), vec!["b".into()]).unwrap();
        let result = registry.register(manager("b", &log), vec!["a".into()]);
        assert!(matches!(
            result,
            Err(ManagerError::DependencyCycle { .. })
        ));
        // The failed registration must not linger.
        assert!(registry.get("b").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_blocks_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ManagerRegistry::new();
        registry.register(manager("config", &log), vec![]).unwrap();
        registry
            .register(
                Arc::new(RecordingManager {
                    name: "bus".into(),
                    log: Arc::clone(&log),
                    fail_init: true,
                }),
                vec!["config".into()],
            )
            .unwrap();
        registry
            .register(manager("scheduler", &log), vec!["bus".into()])
            .unwrap();

        let result = registry.initialize_all().await;
        assert!(matches!(result, Err(ManagerError::InitFailed { .. })));

        let states = registry.states();
        assert_eq!(states["config"], ManagerState::Initialized);
        assert_eq!(states["bus"], ManagerState::Failed);
        assert_eq!(states["scheduler"], ManagerState::Blocked);
    }

    #[tokio::test]
    async fn test_register_deregister_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ManagerRegistry::new();
        registry.register(manager("tmp", &log), vec![]).unwrap();
        assert!(registry.deregister("tmp"));
        assert!(registry.is_empty());
        assert!(!registry.deregister("tmp"));
    }

    #[tokio::test]
    async fn test_typed_lookup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ManagerRegistry::new();
        registry.register(manager("config", &log), vec![]).unwrap();

        let typed: Arc<RecordingManager> = registry.get_as("config").unwrap();
        assert_eq!(typed.name(), "config");
        assert!(matches!(
            registry.get_as::<RecordingManager>("ghost"),
            Err(ManagerError::NotFound { .. })
        ));
    }
}
