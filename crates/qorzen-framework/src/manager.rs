//! Plugin discovery, installation, and lifecycle.
//!
//! The [`PluginManager`] ties the plugin layer together: it scans the
//! configured directories for manifests, resolves dependencies, drives the
//! per-plugin state machine through the [`StateManager`], marshals plugin
//! code through [`PluginCell`]s, and persists install state in the
//! [`InstallRegistry`].
//!
//! Errors raised by plugin code never cross into the kernel: they are
//! captured at the host↔plugin boundary, routed to the error handler, and
//! fail only the plugin concerned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use semver::Version;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use qorzen_core::bus::{EventBus, EventSink};
use qorzen_core::error_handler::{ErrorContext, ErrorHandler};
use qorzen_core::foundation::event::Event;
use qorzen_core::foundation::{ConfigAccess, Severity};
use qorzen_core::manager::Manager;
use qorzen_core::task::TaskScheduler;

use crate::api::PluginApi;
use crate::entry::{EntryRegistry, PluginRuntimeContext};
use crate::error::{PluginError, PluginResult};
use crate::extension::ExtensionRegistry;
use crate::hooks::{HookContext, HookPhase, HookRegistry, HookSet, VersionChange};
use crate::isolation::{IsolationMode, PluginCell, ResourceLimits, ResourceUsage};
use crate::manifest::{PluginManifest, is_valid_plugin_name};
use crate::package::{MANIFEST_FILE, PluginPackage};
use crate::registry::{InstallRegistry, RegistryEntry};
use crate::resolver::resolve_load_order;
use crate::signing::TrustedKeys;
use crate::state::{PluginState, StateManager};

/// Name of the registry file inside the plugins root.
const REGISTRY_FILE: &str = "registry.json";

/// Plugin manager options, sourced from the `core` config section.
#[derive(Debug, Clone)]
pub struct PluginManagerConfig {
    /// Root directory for installs, plugin data, and the registry file.
    pub plugins_root: PathBuf,
    /// Additional directories scanned during discovery.
    pub search_dirs: Vec<PathBuf>,
    /// Isolation mode applied to loaded plugins.
    pub default_isolation: IsolationMode,
    /// Advisory resource limits applied per plugin.
    pub resource_limits: ResourceLimits,
}

/// Public snapshot of one installed/discovered plugin.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// The plugin's manifest.
    pub manifest: PluginManifest,
    /// Install (or discovery) directory.
    pub install_path: PathBuf,
    /// When the plugin was installed or first discovered.
    pub installed_at: DateTime<Utc>,
    /// Persisted enabled flag.
    pub enabled: bool,
    /// Current lifecycle state.
    pub state: PluginState,
    /// Whether the package signature verified.
    pub signature_verified: bool,
}

struct PluginRecord {
    manifest: PluginManifest,
    install_path: PathBuf,
    installed_at: DateTime<Utc>,
    enabled: bool,
    signature_verified: bool,
    hooks: Arc<HookSet>,
}

/// The plugin manager.
pub struct PluginManager {
    config: PluginManagerConfig,
    core_version: Version,
    entries: Arc<EntryRegistry>,
    hook_registry: Arc<HookRegistry>,
    trusted: Arc<TrustedKeys>,
    states: StateManager,
    registry: InstallRegistry,
    records: RwLock<HashMap<String, PluginRecord>>,
    cells: RwLock<HashMap<String, Arc<PluginCell>>>,
    extensions: Arc<ExtensionRegistry>,
    config_access: Arc<dyn ConfigAccess>,
    bus: Arc<EventBus>,
    scheduler: Arc<TaskScheduler>,
    errors: RwLock<Option<Arc<ErrorHandler>>>,
}

impl PluginManager {
    /// Creates the manager and loads the install registry.
    pub fn new(
        config: PluginManagerConfig,
        core_version: Version,
        config_access: Arc<dyn ConfigAccess>,
        bus: Arc<EventBus>,
        scheduler: Arc<TaskScheduler>,
        entries: Arc<EntryRegistry>,
        hook_registry: Arc<HookRegistry>,
        trusted: Arc<TrustedKeys>,
    ) -> PluginResult<Self> {
        let registry = InstallRegistry::load(config.plugins_root.join(REGISTRY_FILE))?;
        Ok(Self {
            config,
            core_version,
            entries,
            hook_registry,
            trusted,
            states: StateManager::new(),
            registry,
            records: RwLock::new(HashMap::new()),
            cells: RwLock::new(HashMap::new()),
            extensions: Arc::new(ExtensionRegistry::new()),
            config_access,
            bus,
            scheduler,
            errors: RwLock::new(None),
        })
    }

    /// Wires the error handler that receives plugin failures.
    pub fn set_error_handler(&self, handler: Arc<ErrorHandler>) {
        *self.errors.write() = Some(handler);
    }

    /// The extension point registry.
    pub fn extensions(&self) -> Arc<ExtensionRegistry> {
        Arc::clone(&self.extensions)
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// The current state of a plugin.
    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.states.state(name)
    }

    /// Snapshot of one plugin.
    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        let records = self.records.read();
        let record = records.get(name)?;
        Some(PluginInfo {
            manifest: record.manifest.clone(),
            install_path: record.install_path.clone(),
            installed_at: record.installed_at,
            enabled: record.enabled,
            state: self.states.state(name).unwrap_or(PluginState::Discovered),
            signature_verified: record.signature_verified,
        })
    }

    /// Snapshot of every known plugin.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        let names: Vec<String> = self.records.read().keys().cloned().collect();
        names.iter().filter_map(|n| self.info(n)).collect()
    }

    /// The capability-gated API handle for a plugin.
    pub fn api(&self, name: &str) -> PluginResult<PluginApi> {
        let records = self.records.read();
        let record = records.get(name).ok_or_else(|| PluginError::NotFound {
            plugin: name.to_string(),
        })?;
        Ok(PluginApi::new(
            name,
            record.manifest.capabilities.clone(),
            Arc::clone(&self.config_access),
            Arc::clone(&self.bus),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.extensions),
        ))
    }

    // ─── Discovery ───────────────────────────────────────────────────────────

    /// Scans the plugins root and the configured search directories for
    /// plugin directories (a `manifest.json` at their root). Newly found
    /// plugins enter `Discovered` (or `Disabled` when the registry says so).
    pub fn discover(&self) -> PluginResult<Vec<String>> {
        let mut found = Vec::new();
        let mut roots = vec![self.config.plugins_root.clone()];
        roots.extend(self.config.search_dirs.iter().cloned());

        for root in roots {
            if !root.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&root).min_depth(1).max_depth(1) {
                let Ok(entry) = entry else { continue };
                if !entry.file_type().is_dir() {
                    continue;
                }
                let manifest_path = entry.path().join(MANIFEST_FILE);
                if !manifest_path.is_file() {
                    continue;
                }
                match self.discover_one(entry.path(), &manifest_path) {
                    Ok(Some(name)) => found.push(name),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Skipping invalid plugin directory");
                        self.report_error(
                            format!("invalid plugin at {}: {e}", entry.path().display()),
                            None,
                            Severity::Low,
                        );
                    }
                }
            }
        }
        Ok(found)
    }

    fn discover_one(&self, dir: &Path, manifest_path: &Path) -> PluginResult<Option<String>> {
        let manifest = PluginManifest::from_file(manifest_path)?;
        let name = manifest.name.clone();
        if self.records.read().contains_key(&name) {
            return Ok(None);
        }

        let hooks = Arc::new(HookSet::resolve(&manifest, &self.hook_registry)?);
        let registry_entry = self.registry.get(&name);
        let enabled = registry_entry.as_ref().is_none_or(|e| e.enabled);
        let signature_verified = registry_entry
            .as_ref()
            .is_some_and(|e| e.signature_verified);

        self.records.write().insert(
            name.clone(),
            PluginRecord {
                manifest,
                install_path: dir.to_path_buf(),
                installed_at: Utc::now(),
                enabled,
                signature_verified,
                hooks,
            },
        );
        let initial = if enabled {
            PluginState::Discovered
        } else {
            PluginState::Disabled
        };
        self.states.track(&name, initial);

        info!(plugin = %name, path = %dir.display(), state = ?initial, "Plugin discovered");
        self.emit(
            Event::builder("plugin_manager/discovered", "plugin_manager")
                .payload_entry("name", name.clone())
                .build(),
        );
        Ok(Some(name))
    }

    // ─── Load / unload ───────────────────────────────────────────────────────

    fn hook_context(&self, record: &PluginRecord, versions: Option<VersionChange>) -> HookContext {
        HookContext {
            plugin: record.manifest.name.clone(),
            config: Arc::clone(&self.config_access),
            events: self.sink(),
            plugins_root: self.config.plugins_root.clone(),
            install_path: record.install_path.clone(),
            data_dir: self.data_dir(&record.manifest.name),
            versions,
        }
    }

    fn data_dir(&self, name: &str) -> PathBuf {
        self.config.plugins_root.join("data").join(name)
    }

    fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.bus) as Arc<dyn EventSink>
    }

    fn emit(&self, event: Event) {
        let _ = self.bus.try_publish(event);
    }

    fn report_error(&self, message: String, plugin: Option<&str>, severity: Severity) {
        if let Some(handler) = self.errors.read().clone() {
            let mut ctx = ErrorContext::new("plugin_manager").severity(severity);
            if let Some(plugin) = plugin {
                ctx = ctx.plugin(plugin);
            }
            handler.handle_error(message, ctx, Map::new());
        }
    }

    /// Loads a plugin: instantiate its entry in the configured isolation and
    /// run `on_load`. Refused with [`PluginError::Disabled`] while the
    /// plugin is explicitly disabled.
    pub async fn load(&self, name: &str) -> PluginResult<()> {
        match self.states.state(name) {
            None => {
                return Err(PluginError::NotFound {
                    plugin: name.to_string(),
                });
            }
            Some(PluginState::Disabled) => {
                return Err(PluginError::Disabled {
                    plugin: name.to_string(),
                });
            }
            Some(PluginState::Active) => return Ok(()),
            _ => {}
        }

        self.states
            .transition(name, "load", PluginState::Loading, None, |_| async { Ok(()) })
            .await?;
        self.activate(name).await
    }

    /// Drives `Loading → Active`, building the isolation cell and running
    /// the entry's `on_load`. On failure the plugin ends `Failed`.
    async fn activate(&self, name: &str) -> PluginResult<()> {
        let result = self
            .states
            .transition(
                name,
                "activate",
                PluginState::Active,
                Some(PluginState::Loading),
                |_| async { self.build_and_load_cell(name).await },
            )
            .await;

        match result {
            Ok(_) => {
                let version = self
                    .records
                    .read()
                    .get(name)
                    .map(|r| r.manifest.version.to_string())
                    .unwrap_or_default();
                self.emit(
                    Event::builder("plugin/loaded", "plugin_manager")
                        .payload_entry("name", name)
                        .payload_entry("version", version)
                        .build(),
                );
                Ok(())
            }
            Err(e) => {
                let _ = self
                    .states
                    .transition(
                        name,
                        "fail",
                        PluginState::Failed,
                        Some(PluginState::Loading),
                        |_| async { Ok(()) },
                    )
                    .await;
                self.report_error(e.to_string(), Some(name), Severity::High);
                Err(e)
            }
        }
    }

    async fn build_and_load_cell(&self, name: &str) -> PluginResult<()> {
        let (manifest, entry_point) = {
            let records = self.records.read();
            let record = records.get(name).ok_or_else(|| PluginError::NotFound {
                plugin: name.to_string(),
            })?;
            (record.manifest.clone(), record.manifest.entry_point.clone())
        };

        let factory =
            self.entries
                .resolve(&entry_point)
                .ok_or_else(|| PluginError::EntryPointMissing {
                    plugin: name.to_string(),
                    entry_point: entry_point.clone(),
                })?;

        let cell = Arc::new(PluginCell::spawn(
            name,
            factory,
            self.config.default_isolation,
            self.config.resource_limits.clone(),
        ));

        let data_dir = self.data_dir(name);
        std::fs::create_dir_all(&data_dir)?;
        let ctx = PluginRuntimeContext {
            plugin: name.to_string(),
            config: Arc::clone(&self.config_access),
            events: self.sink(),
            data_dir,
        };
        cell.load(ctx).await.map_err(|e| PluginError::LoadFailed {
            plugin: name.to_string(),
            message: e.to_string(),
        })?;

        for decl in &manifest.extension_points {
            self.extensions.declare(name, decl);
        }
        self.cells.write().insert(name.to_string(), cell);
        Ok(())
    }

    async fn unload_cell(&self, name: &str) {
        let cell = self.cells.write().remove(name);
        if let Some(cell) = cell {
            if let Err(e) = cell.unload().await {
                warn!(plugin = %name, error = %e, "Plugin unload reported an error");
            }
        }
        self.extensions.revoke_provider(name);
        self.extensions.remove_consumer(name);
    }

    /// Loads every loadable plugin in dependency order. Plugins whose
    /// dependencies failed to activate are skipped.
    pub async fn load_all(&self) -> PluginResult<Vec<String>> {
        let manifests: Vec<PluginManifest> = {
            let records = self.records.read();
            records
                .iter()
                .filter(|(name, _)| {
                    !matches!(
                        self.states.state(name),
                        Some(PluginState::Disabled | PluginState::Uninstalled)
                    )
                })
                .map(|(_, record)| record.manifest.clone())
                .collect()
        };
        let order = resolve_load_order(manifests.iter(), &self.core_version)?;

        let mut loaded = Vec::new();
        for name in order {
            let deps_ok = {
                let records = self.records.read();
                records.get(&name).is_some_and(|record| {
                    record.manifest.dependencies.iter().all(|dep| {
                        dep.name == "core"
                            || dep.optional
                            || self.states.state(&dep.name) == Some(PluginState::Active)
                    })
                })
            };
            if !deps_ok {
                warn!(plugin = %name, "Skipping load; a dependency is not active");
                continue;
            }
            match self.load(&name).await {
                Ok(()) => loaded.push(name),
                Err(e) => warn!(plugin = %name, error = %e, "Plugin failed to load"),
            }
        }
        Ok(loaded)
    }

    // ─── Enable / disable / reload ───────────────────────────────────────────

    /// Explicitly disables a plugin: runs the disable hooks, unloads its
    /// cell, and persists `enabled = false`. Subsequent loads are refused
    /// until [`enable`](Self::enable).
    pub async fn disable(&self, name: &str) -> PluginResult<()> {
        let (hooks, ctx) = self.hooks_and_ctx(name, None)?;
        self.states
            .transition(name, "disable", PluginState::Disabled, None, |_| async {
                hooks.run(HookPhase::PreDisable, &ctx)?;
                self.unload_cell(name).await;
                hooks.run(HookPhase::PostDisable, &ctx)?;
                Ok(())
            })
            .await?;

        if let Some(record) = self.records.write().get_mut(name) {
            record.enabled = false;
        }
        let _ = self.registry.set_enabled(name, false);
        self.emit_state_change(name, PluginState::Disabled);
        Ok(())
    }

    /// Re-enables a plugin: from `Disabled` this re-loads it; from
    /// `Inactive` it resumes participation.
    pub async fn enable(&self, name: &str) -> PluginResult<()> {
        let current = self.states.state(name).ok_or_else(|| PluginError::NotFound {
            plugin: name.to_string(),
        })?;
        let (hooks, ctx) = self.hooks_and_ctx(name, None)?;

        match current {
            PluginState::Disabled => {
                if let Some(record) = self.records.write().get_mut(name) {
                    record.enabled = true;
                }
                let _ = self.registry.set_enabled(name, true);
                self.states
                    .transition(
                        name,
                        "enable",
                        PluginState::Loading,
                        Some(PluginState::Disabled),
                        |_| async {
                            hooks.run(HookPhase::PreEnable, &ctx)?;
                            Ok(())
                        },
                    )
                    .await?;
                self.activate(name).await?;
                let _ = hooks.run(HookPhase::PostEnable, &ctx);
                self.emit_state_change(name, PluginState::Active);
                Ok(())
            }
            PluginState::Inactive => {
                self.states
                    .transition(
                        name,
                        "enable",
                        PluginState::Active,
                        Some(PluginState::Inactive),
                        |_| async {
                            hooks.run(HookPhase::PreEnable, &ctx)?;
                            hooks.run(HookPhase::PostEnable, &ctx)?;
                            Ok(())
                        },
                    )
                    .await?;
                self.emit_state_change(name, PluginState::Active);
                Ok(())
            }
            PluginState::Active => Ok(()),
            other => Err(PluginError::IllegalTransition {
                plugin: name.to_string(),
                from: other,
                to: PluginState::Active,
            }),
        }
    }

    /// Pauses an active plugin (`Active → Inactive`). The cell stays loaded;
    /// the plugin can be resumed with [`enable`](Self::enable).
    pub async fn deactivate(&self, name: &str) -> PluginResult<()> {
        let (hooks, ctx) = self.hooks_and_ctx(name, None)?;
        self.states
            .transition(
                name,
                "deactivate",
                PluginState::Inactive,
                Some(PluginState::Active),
                |_| async {
                    hooks.run(HookPhase::PreDisable, &ctx)?;
                    hooks.run(HookPhase::PostDisable, &ctx)?;
                    Ok(())
                },
            )
            .await?;
        self.emit_state_change(name, PluginState::Inactive);
        Ok(())
    }

    /// Reloads an active plugin: unload the cell, then load it afresh.
    pub async fn reload(&self, name: &str) -> PluginResult<()> {
        self.states
            .transition(
                name,
                "reload",
                PluginState::Loading,
                Some(PluginState::Active),
                |_| async {
                    self.unload_cell(name).await;
                    Ok(())
                },
            )
            .await?;
        self.activate(name).await
    }

    fn hooks_and_ctx(
        &self,
        name: &str,
        versions: Option<VersionChange>,
    ) -> PluginResult<(Arc<HookSet>, HookContext)> {
        let records = self.records.read();
        let record = records.get(name).ok_or_else(|| PluginError::NotFound {
            plugin: name.to_string(),
        })?;
        Ok((
            Arc::clone(&record.hooks),
            self.hook_context(record, versions),
        ))
    }

    fn emit_state_change(&self, name: &str, state: PluginState) {
        self.emit(
            Event::builder("plugin/state_changed", "plugin_manager")
                .payload_entry("name", name)
                .payload_entry("state", serde_json::to_value(state).unwrap_or(Value::Null))
                .build(),
        );
    }

    // ─── Install / update / uninstall ────────────────────────────────────────

    /// Installs a package (ZIP or directory). An already-installed plugin
    /// with a different version is updated in place; the same version fails
    /// with [`PluginError::AlreadyInstalled`]. After a successful install
    /// the plugin is loaded to `Active`.
    pub async fn install(
        &self,
        package_path: &Path,
        skip_verification: bool,
    ) -> PluginResult<String> {
        let package = PluginPackage::open(package_path)?;
        let manifest = package.manifest()?;
        let name = manifest.name.clone();
        if !is_valid_plugin_name(&name) {
            return Err(crate::manifest::ManifestError::InvalidName { name }.into());
        }

        let signature_verified = self.verify_package(&package, &manifest, skip_verification)?;

        if !manifest.supports_core(&self.core_version) {
            return Err(PluginError::IncompatibleCore {
                plugin: name,
                required: format!(
                    ">={}{}",
                    manifest.min_core_version,
                    manifest
                        .max_core_version
                        .as_ref()
                        .map(|m| format!(", <={m}"))
                        .unwrap_or_default()
                ),
                running: self.core_version.clone(),
            });
        }

        // Existing install of another version → update flow.
        let existing_version = self.records.read().get(&name).map(|r| r.manifest.version.clone());
        if let Some(existing) = existing_version {
            if existing == manifest.version {
                return Err(PluginError::AlreadyInstalled {
                    plugin: name,
                    version: existing,
                });
            }
            return self.update(package, manifest, existing).await.map(|_| name);
        }

        // Dependency resolution over everything known plus the candidate.
        {
            let records = self.records.read();
            let mut manifests: Vec<PluginManifest> =
                records.values().map(|r| r.manifest.clone()).collect();
            manifests.push(manifest.clone());
            resolve_load_order(manifests.iter(), &self.core_version)?;
        }

        let hooks = Arc::new(HookSet::resolve(&manifest, &self.hook_registry)?);
        let install_path = self
            .config
            .plugins_root
            .join(format!("{}-{}", name, manifest.version));

        let record = PluginRecord {
            manifest: manifest.clone(),
            install_path: install_path.clone(),
            installed_at: Utc::now(),
            enabled: true,
            signature_verified,
            hooks: Arc::clone(&hooks),
        };
        let ctx = self.hook_context(&record, None);

        hooks
            .run(HookPhase::PreInstall, &ctx)
            .map_err(PluginError::from)?;
        package.extract_to(&install_path)?;
        let _ = hooks.run(HookPhase::PostInstall, &ctx);

        self.records.write().insert(name.clone(), record);
        self.states.track(&name, PluginState::Discovered);
        self.registry.insert(
            &name,
            RegistryEntry {
                version: manifest.version.clone(),
                install_path,
                enabled: true,
                signature_verified,
            },
        )?;

        info!(plugin = %name, version = %manifest.version, "Plugin installed");
        self.emit(
            Event::builder("plugin_manager/installed", "plugin_manager")
                .payload_entry("name", name.clone())
                .payload_entry("version", manifest.version.to_string())
                .build(),
        );

        self.load(&name).await?;
        Ok(name)
    }

    fn verify_package(
        &self,
        package: &PluginPackage,
        manifest: &PluginManifest,
        skip_verification: bool,
    ) -> PluginResult<bool> {
        if self.trusted.is_empty() || skip_verification {
            return Ok(false);
        }
        let digest = package.sha256()?;
        match &manifest.signature {
            Some(signature) => {
                self.trusted.verify(&digest, signature)?;
                Ok(true)
            }
            None => Err(crate::signing::SignatureError::Missing.into()),
        }
    }

    /// Updates an installed plugin to the version carried by `package`.
    ///
    /// `pre_update` runs before anything changes — its failure leaves the
    /// prior version fully in place. A failure while swapping directories
    /// restores the prior directory and entry.
    async fn update(
        &self,
        package: PluginPackage,
        new_manifest: PluginManifest,
        current_version: Version,
    ) -> PluginResult<()> {
        let name = new_manifest.name.clone();
        let versions = VersionChange {
            current: current_version.clone(),
            new: new_manifest.version.clone(),
        };
        let new_hooks = Arc::new(HookSet::resolve(&new_manifest, &self.hook_registry)?);
        let (_, ctx) = self.hooks_and_ctx(&name, Some(versions))?;

        let old_path = self
            .records
            .read()
            .get(&name)
            .map(|r| r.install_path.clone())
            .ok_or_else(|| PluginError::NotFound {
                plugin: name.clone(),
            })?;
        let new_path = self
            .config
            .plugins_root
            .join(format!("{}-{}", name, new_manifest.version));
        let backup_path = self
            .config
            .plugins_root
            .join(format!("{}-{}.bak", name, current_version));

        self.states
            .transition(&name, "update", PluginState::Loading, None, |_| async {
                new_hooks
                    .run(HookPhase::PreUpdate, &ctx)
                    .map_err(PluginError::from)?;

                self.unload_cell(&name).await;

                if old_path.exists() {
                    std::fs::rename(&old_path, &backup_path)?;
                }
                if let Err(e) = package.extract_to(&new_path) {
                    // Restore the prior directory and entry; the old version
                    // stays installed.
                    let _ = std::fs::remove_dir_all(&new_path);
                    if backup_path.exists() {
                        let _ = std::fs::rename(&backup_path, &old_path);
                    }
                    if let Err(restore) = self.build_and_load_cell(&name).await {
                        warn!(plugin = %name, error = %restore, "Could not restore prior entry after failed update");
                    }
                    return Err(e.into());
                }
                let _ = new_hooks.run(HookPhase::PostUpdate, &ctx);
                Ok(())
            })
            .await?;

        if backup_path.exists() {
            let _ = std::fs::remove_dir_all(&backup_path);
        }

        {
            let mut records = self.records.write();
            if let Some(record) = records.get_mut(&name) {
                record.manifest = new_manifest.clone();
                record.install_path = new_path.clone();
                record.hooks = new_hooks;
                record.signature_verified = false;
            }
        }
        self.registry.insert(
            &name,
            RegistryEntry {
                version: new_manifest.version.clone(),
                install_path: new_path,
                enabled: true,
                signature_verified: false,
            },
        )?;
        let _ = self.config_access.set(
            &format!("plugins.{name}.version"),
            Value::String(new_manifest.version.to_string()),
        );

        info!(plugin = %name, from = %current_version, to = %new_manifest.version, "Plugin updated");
        self.emit(
            Event::builder("plugin_manager/updated", "plugin_manager")
                .payload_entry("name", name.clone())
                .payload_entry("from", current_version.to_string())
                .payload_entry("to", new_manifest.version.to_string())
                .build(),
        );

        self.activate(&name).await
    }

    /// Uninstalls a plugin. With `keep_data` the plugin's data directory
    /// survives; everything else is removed.
    pub async fn uninstall(&self, name: &str, keep_data: bool) -> PluginResult<()> {
        let (hooks, ctx) = self.hooks_and_ctx(name, None)?;
        let install_path = ctx.install_path.clone();
        let data_dir = ctx.data_dir.clone();

        self.states
            .transition(name, "uninstall", PluginState::Uninstalled, None, |_| async {
                hooks.run(HookPhase::PreUninstall, &ctx)?;
                self.unload_cell(name).await;
                if install_path.exists() {
                    std::fs::remove_dir_all(&install_path)?;
                }
                if !keep_data && data_dir.exists() {
                    std::fs::remove_dir_all(&data_dir)?;
                }
                let _ = hooks.run(HookPhase::PostUninstall, &ctx);
                Ok(())
            })
            .await?;

        self.records.write().remove(name);
        self.states.remove(name);
        self.registry.remove(name)?;

        info!(plugin = %name, keep_data, "Plugin uninstalled");
        self.emit(
            Event::builder("plugin_manager/uninstalled", "plugin_manager")
                .payload_entry("name", name)
                .build(),
        );
        Ok(())
    }

    // ─── Method calls & resource policing ────────────────────────────────────

    /// Invokes a method on an active plugin through its isolation cell.
    pub async fn run_plugin_method(
        &self,
        name: &str,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> PluginResult<Value> {
        let cell = self
            .cells
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                plugin: name.to_string(),
            })?;
        cell.run_method(method, args, timeout)
            .await
            .map_err(PluginError::from)
    }

    /// Feeds a monitor sample into the plugin's advisory limits. A breach
    /// fails the plugin: its cell is unloaded and the state becomes
    /// `Failed`.
    pub async fn report_usage(&self, name: &str, usage: &ResourceUsage) -> PluginResult<()> {
        let cell = self.cells.read().get(name).cloned();
        let Some(cell) = cell else { return Ok(()) };

        if let Err(breach) = cell.check_limits(usage) {
            warn!(plugin = %name, error = %breach, "Resource limit breached");
            self.report_error(breach.to_string(), Some(name), Severity::High);
            let _ = self
                .states
                .transition(name, "fail", PluginState::Failed, None, |_| async {
                    self.unload_cell(name).await;
                    Ok(())
                })
                .await;
            self.emit_state_change(name, PluginState::Failed);
            return Err(breach.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Manager for PluginManager {
    fn name(&self) -> &str {
        "plugin_manager"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config.plugins_root)?;
        self.discover()?;
        self.load_all().await?;
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        let names: Vec<String> = self.cells.read().keys().cloned().collect();
        for name in names {
            debug!(plugin = %name, "Unloading plugin");
            self.unload_cell(&name).await;
        }
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}
