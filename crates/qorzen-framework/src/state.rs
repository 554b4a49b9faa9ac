//! Plugin lifecycle states and the transition serializer.
//!
//! ```text
//! Discovered ──► Loading ──► { Active | Failed }
//! Active ◄──► Inactive           (disable / enable)
//! any ──► Disabled               (explicit)
//! Active ──► Loading             (reload)
//! any ──► Uninstalled            (terminal)
//! ```
//!
//! The [`StateManager`] owns a mutex per plugin: at any instant at most one
//! lifecycle transition per plugin is in flight, and concurrent requests
//! queue on the mutex in arrival order. On failure the pre-transition state
//! is kept (the target is only committed after the operation succeeds) and
//! the error propagates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PluginError, PluginResult};

/// Lifecycle state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Manifest found and validated; code not loaded.
    Discovered,
    /// A load or reload is in progress.
    Loading,
    /// Loaded and participating.
    Active,
    /// Loaded but disabled at runtime; can be re-enabled.
    Inactive,
    /// Explicitly disabled; loading is refused until re-enabled.
    Disabled,
    /// Load or isolation failure.
    Failed,
    /// Removed. Terminal.
    Uninstalled,
}

impl PluginState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Uninstalled)
    }

    /// Whether `self → to` is on the lawful transition graph.
    pub fn can_transition_to(&self, to: PluginState) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Explicit disable and uninstall are reachable from any live state.
        if matches!(to, Self::Disabled | Self::Uninstalled) {
            return true;
        }
        matches!(
            (self, to),
            (Self::Discovered, Self::Loading)
                | (Self::Loading, Self::Active)
                | (Self::Loading, Self::Failed)
                | (Self::Active, Self::Inactive)
                | (Self::Active, Self::Loading)
                | (Self::Inactive, Self::Active)
                | (Self::Disabled, Self::Loading)
                | (Self::Active, Self::Failed)
                | (Self::Inactive, Self::Failed)
        )
    }
}

/// Serializes lifecycle transitions per plugin.
#[derive(Default)]
pub struct StateManager {
    states: RwLock<HashMap<String, PluginState>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    pending: RwLock<HashMap<String, String>>,
}

impl StateManager {
    /// Creates an empty state table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a plugin in the given state.
    pub fn track(&self, plugin: impl Into<String>, state: PluginState) {
        self.states.write().insert(plugin.into(), state);
    }

    /// Stops tracking a plugin (after uninstall).
    pub fn remove(&self, plugin: &str) {
        self.states.write().remove(plugin);
        self.locks.lock().remove(plugin);
        self.pending.write().remove(plugin);
    }

    /// The plugin's current state.
    pub fn state(&self, plugin: &str) -> Option<PluginState> {
        self.states.read().get(plugin).copied()
    }

    /// Snapshot of every tracked plugin's state.
    pub fn states(&self) -> HashMap<String, PluginState> {
        self.states.read().clone()
    }

    /// The label of the in-flight transition, if any.
    pub fn pending_operation(&self, plugin: &str) -> Option<String> {
        self.pending.read().get(plugin).cloned()
    }

    fn lock_for(&self, plugin: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(plugin.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Runs a guarded transition.
    ///
    /// Acquires the plugin's transition mutex, verifies the pre-state (when
    /// `expected` is given) and the lawfulness of `current → target`, runs
    /// `op`, and commits `target` only when `op` succeeds. The caller
    /// composes its `pre_*`/`post_*` hooks inside `op`.
    pub async fn transition<Fut>(
        &self,
        plugin: &str,
        label: &str,
        target: PluginState,
        expected: Option<PluginState>,
        op: impl FnOnce(PluginState) -> Fut,
    ) -> PluginResult<PluginState>
    where
        Fut: Future<Output = PluginResult<()>>,
    {
        let lock = self.lock_for(plugin);
        let _guard = lock.lock().await;

        let current = self.state(plugin).ok_or_else(|| PluginError::NotFound {
            plugin: plugin.to_string(),
        })?;
        if let Some(expected) = expected
            && current != expected
        {
            return Err(PluginError::TransitionConflict {
                plugin: plugin.to_string(),
                expected,
                actual: current,
            });
        }
        if !current.can_transition_to(target) {
            return Err(PluginError::IllegalTransition {
                plugin: plugin.to_string(),
                from: current,
                to: target,
            });
        }

        self.pending
            .write()
            .insert(plugin.to_string(), label.to_string());
        debug!(plugin = %plugin, operation = %label, from = ?current, to = ?target, "Transition started");

        let result = op(current).await;
        self.pending.write().remove(plugin);

        match result {
            Ok(()) => {
                self.states.write().insert(plugin.to_string(), target);
                debug!(plugin = %plugin, state = ?target, "Transition committed");
                Ok(target)
            }
            Err(e) => {
                debug!(plugin = %plugin, operation = %label, error = %e, "Transition failed, state kept");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_lawful_transitions() {
        use PluginState::*;
        assert!(Discovered.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Active));
        assert!(Loading.can_transition_to(Failed));
        assert!(Active.can_transition_to(Inactive));
        assert!(Inactive.can_transition_to(Active));
        assert!(Active.can_transition_to(Loading));
        assert!(Failed.can_transition_to(Disabled));
        assert!(Inactive.can_transition_to(Uninstalled));
        assert!(!Discovered.can_transition_to(Active));
        assert!(!Uninstalled.can_transition_to(Loading));
        assert!(!Uninstalled.can_transition_to(Disabled));
        assert!(!Failed.can_transition_to(Loading));
    }

    #[tokio::test]
    async fn test_transition_commits_on_success() {
        let manager = StateManager::new();
        manager.track("sample", PluginState::Discovered);

        let state = manager
            .transition("sample", "load", PluginState::Loading, None, |_| async {
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(state, PluginState::Loading);
        assert_eq!(manager.state("sample"), Some(PluginState::Loading));
    }

    #[tokio::test]
    async fn test_transition_keeps_state_on_failure() {
        let manager = StateManager::new();
        manager.track("sample", PluginState::Discovered);

        let result = manager
            .transition("sample", "load", PluginState::Loading, None, |_| async {
                Err(PluginError::LoadFailed {
                    plugin: "sample".into(),
                    message: "entry refused".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(manager.state("sample"), Some(PluginState::Discovered));
        assert!(manager.pending_operation("sample").is_none());
    }

    #[tokio::test]
    async fn test_expected_state_mismatch() {
        let manager = StateManager::new();
        manager.track("sample", PluginState::Active);

        let result = manager
            .transition(
                "sample",
                "enable",
                PluginState::Active,
                Some(PluginState::Inactive),
                |_| async { Ok(()) },
            )
            .await;
        assert!(matches!(
            result,
            Err(PluginError::TransitionConflict { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transitions_are_serialized_per_plugin() {
        let manager = Arc::new(StateManager::new());
        manager.track("sample", PluginState::Active);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                // Bounce Active -> Inactive or back; either way the op bodies
                // must never overlap.
                let current = manager.state("sample").unwrap();
                let target = match current {
                    PluginState::Active => PluginState::Inactive,
                    _ => PluginState::Active,
                };
                let _ = manager
                    .transition("sample", "bounce", target, None, |_| async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
