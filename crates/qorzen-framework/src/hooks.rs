//! Lifecycle hooks.
//!
//! A manifest may declare hook references for the ten phases (`pre`/`post` ×
//! install/uninstall/enable/disable/update). References are `module:function`
//! strings resolved against the host's [`HookRegistry`] at install time;
//! hooks themselves are plain functions over a [`HookContext`].
//!
//! A failing `pre_*` hook aborts the transition. A failing `post_*` hook is
//! logged and the transition stands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use semver::Version;
use thiserror::Error;
use tracing::{debug, warn};

use qorzen_core::bus::EventSink;
use qorzen_core::foundation::{BoxError, ConfigAccess};

use crate::manifest::PluginManifest;

/// The ten lifecycle hook phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    PreInstall,
    PostInstall,
    PreUninstall,
    PostUninstall,
    PreEnable,
    PostEnable,
    PreDisable,
    PostDisable,
    PreUpdate,
    PostUpdate,
}

impl HookPhase {
    /// Manifest key for this phase (`pre_install`, ...).
    pub fn key(&self) -> &'static str {
        match self {
            Self::PreInstall => "pre_install",
            Self::PostInstall => "post_install",
            Self::PreUninstall => "pre_uninstall",
            Self::PostUninstall => "post_uninstall",
            Self::PreEnable => "pre_enable",
            Self::PostEnable => "post_enable",
            Self::PreDisable => "pre_disable",
            Self::PostDisable => "post_disable",
            Self::PreUpdate => "pre_update",
            Self::PostUpdate => "post_update",
        }
    }

    /// Parses a manifest key.
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "pre_install" => Self::PreInstall,
            "post_install" => Self::PostInstall,
            "pre_uninstall" => Self::PreUninstall,
            "post_uninstall" => Self::PostUninstall,
            "pre_enable" => Self::PreEnable,
            "post_enable" => Self::PostEnable,
            "pre_disable" => Self::PreDisable,
            "post_disable" => Self::PostDisable,
            "pre_update" => Self::PreUpdate,
            "post_update" => Self::PostUpdate,
            _ => return None,
        })
    }

    /// `pre_*` phases gate the transition; `post_*` phases do not.
    pub fn is_pre(&self) -> bool {
        matches!(
            self,
            Self::PreInstall
                | Self::PreUninstall
                | Self::PreEnable
                | Self::PreDisable
                | Self::PreUpdate
        )
    }
}

/// Version pair passed to update hooks.
#[derive(Debug, Clone)]
pub struct VersionChange {
    /// The version installed before the update.
    pub current: Version,
    /// The version being installed.
    pub new: Version,
}

/// Context map handed to every hook invocation.
pub struct HookContext {
    /// The plugin the hook belongs to.
    pub plugin: String,
    /// Configuration handle.
    pub config: Arc<dyn ConfigAccess>,
    /// Event sink for notifications.
    pub events: Arc<dyn EventSink>,
    /// Root directory holding all plugin installs.
    pub plugins_root: PathBuf,
    /// This plugin's install directory.
    pub install_path: PathBuf,
    /// This plugin's data directory.
    pub data_dir: PathBuf,
    /// Current/new versions; present for update hooks only.
    pub versions: Option<VersionChange>,
}

/// A hook implementation: a plain function over the context.
pub type HookFn = fn(&HookContext) -> Result<(), BoxError>;

/// Errors from hook resolution and execution.
#[derive(Debug, Clone, Error)]
pub enum LifecycleHookError {
    /// The manifest references a hook the host never registered.
    #[error("plugin '{plugin}' hook {phase} references unregistered '{reference}'")]
    Unresolved {
        /// The declaring plugin.
        plugin: String,
        /// The phase key.
        phase: &'static str,
        /// The dangling `module:function` reference.
        reference: String,
    },

    /// The hook ran and returned an error.
    #[error("plugin '{plugin}' hook {phase} failed: {message}")]
    Failed {
        /// The declaring plugin.
        plugin: String,
        /// The phase key.
        phase: &'static str,
        /// The hook's error, stringified.
        message: String,
    },
}

/// Host-side registry of hook implementations keyed by `module:function`.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<String, HookFn>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook implementation under its reference string.
    pub fn register(&self, reference: impl Into<String>, hook: HookFn) {
        self.hooks.write().insert(reference.into(), hook);
    }

    /// Resolves a reference.
    pub fn resolve(&self, reference: &str) -> Option<HookFn> {
        self.hooks.read().get(reference).copied()
    }
}

/// The hooks of one plugin, resolved at install time.
pub struct HookSet {
    plugin: String,
    resolved: HashMap<HookPhase, HookFn>,
}

impl HookSet {
    /// An empty set for plugins without hooks.
    pub fn empty(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            resolved: HashMap::new(),
        }
    }

    /// Resolves every hook the manifest declares. A dangling reference fails
    /// the whole set — before any install work happens.
    pub fn resolve(
        manifest: &PluginManifest,
        registry: &HookRegistry,
    ) -> Result<Self, LifecycleHookError> {
        let mut resolved = HashMap::new();
        for (key, reference) in &manifest.lifecycle_hooks {
            // Unknown keys were rejected during manifest validation.
            let Some(phase) = HookPhase::from_key(key) else {
                continue;
            };
            let hook = registry
                .resolve(reference)
                .ok_or_else(|| LifecycleHookError::Unresolved {
                    plugin: manifest.name.clone(),
                    phase: phase.key(),
                    reference: reference.clone(),
                })?;
            resolved.insert(phase, hook);
        }
        Ok(Self {
            plugin: manifest.name.clone(),
            resolved,
        })
    }

    /// Runs a phase. `pre_*` errors abort the caller's transition; `post_*`
    /// errors are logged and swallowed.
    pub fn run(&self, phase: HookPhase, ctx: &HookContext) -> Result<(), LifecycleHookError> {
        let Some(hook) = self.resolved.get(&phase) else {
            return Ok(());
        };
        debug!(plugin = %self.plugin, phase = phase.key(), "Running lifecycle hook");
        match hook(ctx) {
            Ok(()) => Ok(()),
            Err(e) => {
                let error = LifecycleHookError::Failed {
                    plugin: self.plugin.clone(),
                    phase: phase.key(),
                    message: e.to_string(),
                };
                if phase.is_pre() {
                    Err(error)
                } else {
                    warn!(plugin = %self.plugin, phase = phase.key(), error = %e,
                        "Post hook failed; transition stands");
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qorzen_core::foundation::error::EventBusResult;
    use qorzen_core::foundation::event::Event;
    use serde_json::Value;

    struct NullSink;
    impl EventSink for NullSink {
        fn try_publish(&self, _event: Event) -> EventBusResult<()> {
            Ok(())
        }
    }

    struct NullConfig;
    impl ConfigAccess for NullConfig {
        fn get(&self, _key: &str) -> Option<Value> {
            None
        }
        fn set(&self, _key: &str, _value: Value) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn ctx() -> HookContext {
        HookContext {
            plugin: "sample".into(),
            config: Arc::new(NullConfig),
            events: Arc::new(NullSink),
            plugins_root: PathBuf::from("/tmp/plugins"),
            install_path: PathBuf::from("/tmp/plugins/sample-1.0.0"),
            data_dir: PathBuf::from("/tmp/plugins/sample-1.0.0/data"),
            versions: None,
        }
    }

    fn manifest_with_hooks(hooks: &[(&str, &str)]) -> PluginManifest {
        let hooks_json: String = hooks
            .iter()
            .map(|(k, v)| format!("\"{k}\": \"{v}\""))
            .collect::<Vec<_>>()
            .join(", ");
        PluginManifest::from_json(&format!(
            r#"{{
                "name": "sample",
                "version": "1.0.0",
                "description": "x",
                "author": {{ "name": "t" }},
                "entry_point": "sample",
                "min_core_version": "0.1.0",
                "lifecycle_hooks": {{ {hooks_json} }}
            }}"#
        ))
        .unwrap()
    }

    fn failing_hook(_ctx: &HookContext) -> Result<(), BoxError> {
        Err("hook refused".into())
    }

    fn ok_hook(_ctx: &HookContext) -> Result<(), BoxError> {
        Ok(())
    }

    #[test]
    fn test_phase_keys_round_trip() {
        for phase in [
            HookPhase::PreInstall,
            HookPhase::PostUninstall,
            HookPhase::PreUpdate,
            HookPhase::PostDisable,
        ] {
            assert_eq!(HookPhase::from_key(phase.key()), Some(phase));
        }
        assert_eq!(HookPhase::from_key("mid_install"), None);
    }

    #[test]
    fn test_unresolved_reference_fails_resolution() {
        let registry = HookRegistry::new();
        let manifest = manifest_with_hooks(&[("pre_install", "sample:missing")]);
        assert!(matches!(
            HookSet::resolve(&manifest, &registry),
            Err(LifecycleHookError::Unresolved { .. })
        ));
    }

    #[test]
    fn test_pre_hook_error_aborts() {
        let registry = HookRegistry::new();
        registry.register("sample:bad", failing_hook);
        let manifest = manifest_with_hooks(&[("pre_enable", "sample:bad")]);
        let set = HookSet::resolve(&manifest, &registry).unwrap();
        assert!(set.run(HookPhase::PreEnable, &ctx()).is_err());
    }

    #[test]
    fn test_post_hook_error_is_swallowed() {
        let registry = HookRegistry::new();
        registry.register("sample:bad", failing_hook);
        let manifest = manifest_with_hooks(&[("post_enable", "sample:bad")]);
        let set = HookSet::resolve(&manifest, &registry).unwrap();
        assert!(set.run(HookPhase::PostEnable, &ctx()).is_ok());
    }

    #[test]
    fn test_undeclared_phase_is_noop() {
        let registry = HookRegistry::new();
        registry.register("sample:ok", ok_hook);
        let manifest = manifest_with_hooks(&[("post_install", "sample:ok")]);
        let set = HookSet::resolve(&manifest, &registry).unwrap();
        assert!(set.run(HookPhase::PreUninstall, &ctx()).is_ok());
    }
}
