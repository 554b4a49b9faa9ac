//! Plugin dependency resolution.
//!
//! Builds a dependency graph over a set of manifests and produces the load
//! order: topological layers, alphabetical within a layer. Resolution fails
//! before any load occurs — a missing or version-incompatible dependency, or
//! a cycle, rejects the whole operation.
//!
//! A dependency named `core` targets the platform itself and is checked
//! against the running core version.

use std::collections::BTreeMap;

use semver::Version;
use thiserror::Error;

use qorzen_core::manager::topological_layers;

use crate::manifest::PluginManifest;

/// Errors from dependency resolution.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// A required dependency is not present.
    #[error("plugin '{plugin}' requires '{dependency}', which is not available")]
    MissingDependency {
        /// The requiring plugin.
        plugin: String,
        /// The missing dependency.
        dependency: String,
    },

    /// The dependency exists but its version is out of range.
    #[error("plugin '{plugin}' requires '{dependency}' {range}, found {found}")]
    IncompatibleVersion {
        /// The requiring plugin.
        plugin: String,
        /// The dependency.
        dependency: String,
        /// The accepted range.
        range: String,
        /// The version actually available.
        found: Version,
    },

    /// The dependency graph contains a cycle.
    #[error("circular plugin dependency involving: {names:?}")]
    CircularDependency {
        /// Plugins inside the cycle.
        names: Vec<String>,
    },
}

/// Computes the load order for `manifests` against the running core version.
///
/// Returns plugin names in load order (dependencies first; alphabetical
/// within a dependency layer).
pub fn resolve_load_order<'a, I>(
    manifests: I,
    core_version: &Version,
) -> Result<Vec<String>, ResolveError>
where
    I: IntoIterator<Item = &'a PluginManifest>,
{
    let by_name: BTreeMap<&str, &PluginManifest> = manifests
        .into_iter()
        .map(|m| (m.name.as_str(), m))
        .collect();

    let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, manifest) in &by_name {
        let mut deps = Vec::new();
        for dep in &manifest.dependencies {
            if dep.name == "core" {
                if !dep.range.matches(core_version) {
                    return Err(ResolveError::IncompatibleVersion {
                        plugin: manifest.name.clone(),
                        dependency: "core".to_string(),
                        range: dep.range.to_string(),
                        found: core_version.clone(),
                    });
                }
                continue;
            }
            match by_name.get(dep.name.as_str()) {
                Some(provider) => {
                    if !dep.range.matches(&provider.version) {
                        return Err(ResolveError::IncompatibleVersion {
                            plugin: manifest.name.clone(),
                            dependency: dep.name.clone(),
                            range: dep.range.to_string(),
                            found: provider.version.clone(),
                        });
                    }
                    deps.push(dep.name.clone());
                }
                None if dep.optional => {}
                None => {
                    return Err(ResolveError::MissingDependency {
                        plugin: manifest.name.clone(),
                        dependency: dep.name.clone(),
                    });
                }
            }
        }
        graph.insert(name.to_string(), deps);
    }

    let layers = topological_layers(&graph)
        .map_err(|names| ResolveError::CircularDependency { names })?;
    Ok(layers.into_iter().flatten().collect())
}
