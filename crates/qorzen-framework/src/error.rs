//! Plugin-layer error types.
//!
//! Sub-errors live next to the code that raises them (manifest, resolver,
//! signing, packages, hooks, isolation); [`PluginError`] aggregates them for
//! the plugin manager surface.

use thiserror::Error;

use qorzen_core::foundation::error::{EventBusError, TaskError};

use crate::capability::Capability;
use crate::extension::ExtensionError;
use crate::hooks::LifecycleHookError;
use crate::isolation::IsolationError;
use crate::manifest::ManifestError;
use crate::package::PackageError;
use crate::registry::RegistryError;
use crate::resolver::ResolveError;
use crate::signing::SignatureError;
use crate::state::PluginState;

/// Errors from the plugin manager and its collaborators.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No plugin with the given name is known.
    #[error("plugin '{plugin}' not found")]
    NotFound {
        /// The missing plugin.
        plugin: String,
    },

    /// The plugin is explicitly disabled; loading it is refused.
    #[error("plugin '{plugin}' is disabled")]
    Disabled {
        /// The disabled plugin.
        plugin: String,
    },

    /// The requested state change is not on the lawful transition graph.
    #[error("plugin '{plugin}' cannot transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// The plugin.
        plugin: String,
        /// State before the request.
        from: PluginState,
        /// Requested target state.
        to: PluginState,
    },

    /// The caller's expected pre-state did not match the actual state.
    #[error("plugin '{plugin}' is in state {actual:?}, expected {expected:?}")]
    TransitionConflict {
        /// The plugin.
        plugin: String,
        /// State the caller required.
        expected: PluginState,
        /// State actually observed.
        actual: PluginState,
    },

    /// The plugin lacks a required capability. No side effects occurred.
    #[error("plugin '{plugin}' lacks capability '{capability}'")]
    PermissionDenied {
        /// The calling plugin.
        plugin: String,
        /// The missing capability.
        capability: Capability,
    },

    /// The configuration service rejected a plugin's write.
    #[error("plugin '{plugin}' config write to '{key}' rejected: {message}")]
    ConfigRejected {
        /// The writing plugin.
        plugin: String,
        /// The dotted key.
        key: String,
        /// The service's reason.
        message: String,
    },

    /// The plugin's entry code failed during load or unload.
    #[error("plugin '{plugin}' failed to load: {message}")]
    LoadFailed {
        /// The plugin.
        plugin: String,
        /// The underlying error, stringified.
        message: String,
    },

    /// Install of a `(name, version)` pair that is already present.
    #[error("plugin '{plugin}' version {version} is already installed")]
    AlreadyInstalled {
        /// The plugin.
        plugin: String,
        /// The duplicate version.
        version: semver::Version,
    },

    /// The manifest's entry point names no registered factory.
    #[error("plugin '{plugin}' entry point '{entry_point}' is not registered")]
    EntryPointMissing {
        /// The plugin.
        plugin: String,
        /// The unresolved entry point hint.
        entry_point: String,
    },

    /// The plugin requires an incompatible core version.
    #[error("plugin '{plugin}' requires core {required}, running {running}")]
    IncompatibleCore {
        /// The plugin.
        plugin: String,
        /// The manifest's core version bounds, rendered.
        required: String,
        /// The running core version.
        running: semver::Version,
    },

    /// Manifest parse/validation failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Dependency resolution failure.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Package signature failure.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Package layout or extraction failure.
    #[error(transparent)]
    Package(#[from] PackageError),

    /// Lifecycle hook failure.
    #[error(transparent)]
    Hook(#[from] LifecycleHookError),

    /// Isolation failure; the plugin transitions to `Failed`.
    #[error(transparent)]
    Isolation(#[from] IsolationError),

    /// Install registry persistence failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Extension point failure.
    #[error(transparent)]
    Extension(#[from] ExtensionError),

    /// Event bus refusal surfaced through the plugin API.
    #[error("plugin '{plugin}': {error}")]
    Bus {
        /// The calling plugin.
        plugin: String,
        /// The bus error.
        #[source]
        error: EventBusError,
    },

    /// Scheduler refusal surfaced through the plugin API.
    #[error("plugin '{plugin}': {error}")]
    Task {
        /// The calling plugin.
        plugin: String,
        /// The scheduler error.
        #[source]
        error: TaskError,
    },

    /// Filesystem failure during install/update/uninstall.
    #[error("plugin filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
