//! # Qorzen Framework
//!
//! The plugin layer of the Qorzen platform.
//!
//! A *plugin* is a packaged extension unit described by a `manifest.json`:
//! identity, version, capabilities, dependencies, entry point, lifecycle
//! hooks. This crate owns everything between a package on disk and a
//! running, isolated plugin instance:
//!
//! - **Manifests** — parsing, validation, canonical JSON ([`PluginManifest`])
//! - **Capabilities** — the closed permission set ([`Capability`],
//!   [`CapabilitySet`])
//! - **Version ranges** — `= > >= < <= ^ ~` over semver ([`VersionRange`])
//! - **Resolution** — dependency graph → load order ([`resolve_load_order`])
//! - **State machine** — serialized per-plugin transitions ([`StateManager`])
//! - **Hooks** — `pre_*`/`post_*` functions resolved by reference
//!   ([`HookRegistry`])
//! - **Isolation** — per-plugin worker thread, queued method calls
//!   ([`PluginCell`])
//! - **Packages & signing** — ZIP/directory layout, SHA-256 integrity,
//!   Ed25519 signatures ([`PluginPackage`], [`TrustedKeys`])
//! - **Install registry** — persisted per-root install state
//!   ([`InstallRegistry`])
//! - **The manager** — discovery, install/update/uninstall, lifecycle
//!   ([`PluginManager`])
//!
//! Plugins reach the platform only through the capability-gated
//! [`PluginApi`]; capability checks happen there, at the surface, and a
//! denied call has no side effects.

pub mod api;
pub mod capability;
pub mod entry;
pub mod error;
pub mod extension;
pub mod hooks;
pub mod isolation;
pub mod manager;
pub mod manifest;
pub mod package;
pub mod registry;
pub mod resolver;
pub mod signing;
pub mod state;
pub mod version;

pub use api::PluginApi;
pub use capability::{Capability, CapabilitySet, RiskLevel};
pub use entry::{EntryFactory, EntryRegistry, PluginEntry, PluginRuntimeContext};
pub use error::{PluginError, PluginResult};
pub use extension::{ExtensionError, ExtensionHandler, ExtensionRegistry};
pub use hooks::{
    HookContext, HookFn, HookPhase, HookRegistry, HookSet, LifecycleHookError, VersionChange,
};
pub use isolation::{
    IsolationError, IsolationMode, PluginCell, ResourceLimits, ResourceUsage,
};
pub use manager::{PluginInfo, PluginManager, PluginManagerConfig};
pub use manifest::{
    ExtensionPointDecl, ExtensionUse, ManifestError, PluginAuthor, PluginDependency,
    PluginManifest, is_valid_plugin_name,
};
pub use package::{PackageError, PluginPackage};
pub use registry::{InstallRegistry, RegistryEntry, RegistryError};
pub use resolver::{ResolveError, resolve_load_order};
pub use signing::{SignatureError, TrustedKeys, fingerprint, sha256, sign_digest};
pub use state::{PluginState, StateManager};
pub use version::{VersionRange, VersionRangeError};

/// Prelude for common imports.
pub mod prelude {
    pub use super::api::PluginApi;
    pub use super::capability::{Capability, CapabilitySet};
    pub use super::entry::{PluginEntry, PluginRuntimeContext};
    pub use super::error::{PluginError, PluginResult};
    pub use super::manager::{PluginManager, PluginManagerConfig};
    pub use super::manifest::PluginManifest;
    pub use super::state::PluginState;
}
