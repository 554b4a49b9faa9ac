//! Plugin manifest parsing and validation.
//!
//! A manifest is the immutable JSON document at the root of every plugin
//! package (`manifest.json`). The `(name, version)` tuple is globally unique
//! in a repository; `name` is the plugin's stable identity.

use std::collections::BTreeMap;
use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::capability::CapabilitySet;
use crate::hooks::HookPhase;
use crate::version::VersionRange;

/// Errors raised while reading or validating a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document is not valid JSON or misses required fields.
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    /// The manifest file could not be read.
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    /// Plugin names are lowercase identifiers over `[a-z0-9_-]`.
    #[error("invalid plugin name '{name}'")]
    InvalidName {
        /// The offending name.
        name: String,
    },

    /// A lifecycle hook key is not one of the ten known phases.
    #[error("unknown lifecycle hook phase '{phase}'")]
    UnknownHookPhase {
        /// The offending key.
        phase: String,
    },

    /// A dependency entry references an invalid plugin name.
    #[error("invalid dependency name '{name}'")]
    InvalidDependencyName {
        /// The offending name.
        name: String,
    },
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Plugin author block. Only `name` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAuthor {
    /// Author or team name.
    pub name: String,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Homepage or profile URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

/// A declared dependency on another plugin (or on `core`, the platform).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependency {
    /// Name of the required plugin; `core` targets the platform itself.
    pub name: String,
    /// Accepted version range.
    #[serde(rename = "version")]
    pub range: VersionRange,
    /// Optional dependencies do not block loading when absent.
    #[serde(default)]
    pub optional: bool,
}

/// An extension point this plugin provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPointDecl {
    /// Point id, unique within the provider.
    pub id: String,
    /// Interface version of the point.
    pub version: Version,
}

/// A use-site of another plugin's extension point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionUse {
    /// Providing plugin.
    pub provider: String,
    /// Point id at the provider.
    pub id: String,
    /// Accepted interface versions.
    #[serde(rename = "version")]
    pub range: VersionRange,
}

/// The immutable plugin manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Stable identity: lowercase identifier over `[a-z0-9_-]`.
    pub name: String,
    /// Human-facing name; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Plugin version.
    pub version: Version,
    /// Short description.
    pub description: String,
    /// Author block (`author.name` required).
    pub author: PluginAuthor,
    /// SPDX license expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Project homepage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Declared capabilities; everything else is denied.
    #[serde(default)]
    pub capabilities: CapabilitySet,
    /// Plugin dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PluginDependency>,
    /// Minimum compatible core version.
    pub min_core_version: Version,
    /// Maximum compatible core version, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_core_version: Option<Version>,
    /// Entry point hint resolved against the host's entry registry.
    pub entry_point: String,
    /// Extension points this plugin provides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension_points: Vec<ExtensionPointDecl>,
    /// Extension points this plugin uses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension_uses: Vec<ExtensionUse>,
    /// Lifecycle hooks: phase name → `module:function` reference.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lifecycle_hooks: BTreeMap<String, String>,
    /// Declarative schema for the plugin's config overlay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
    /// Base64 package signature by a trusted key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Whether `name` is a valid plugin identifier.
pub fn is_valid_plugin_name(name: &str) -> bool {
    !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

impl PluginManifest {
    /// Parses and validates a manifest from JSON text.
    pub fn from_json(json: &str) -> ManifestResult<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads and validates `manifest.json` from disk.
    pub fn from_file(path: &Path) -> ManifestResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serializes the canonical JSON form. Deserializing it yields an equal
    /// manifest.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> ManifestResult<()> {
        if !is_valid_plugin_name(&self.name) {
            return Err(ManifestError::InvalidName {
                name: self.name.clone(),
            });
        }
        for dep in &self.dependencies {
            if dep.name != "core" && !is_valid_plugin_name(&dep.name) {
                return Err(ManifestError::InvalidDependencyName {
                    name: dep.name.clone(),
                });
            }
        }
        for phase in self.lifecycle_hooks.keys() {
            if HookPhase::from_key(phase).is_none() {
                return Err(ManifestError::UnknownHookPhase {
                    phase: phase.clone(),
                });
            }
        }
        Ok(())
    }

    /// The human-facing name.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether this plugin is compatible with the given core version.
    pub fn supports_core(&self, core: &Version) -> bool {
        if core < &self.min_core_version {
            return false;
        }
        match &self.max_core_version {
            Some(max) => core <= max,
            None => true,
        }
    }
}
