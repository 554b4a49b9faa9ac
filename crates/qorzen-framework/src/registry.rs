//! The persisted install registry.
//!
//! One JSON file per plugins root records every installed plugin and its
//! enabled state. The file is rewritten atomically (temp file + rename) so a
//! crash mid-save never corrupts it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from registry persistence.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Filesystem failure.
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry file is not valid JSON.
    #[error("corrupt registry file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One installed plugin's registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Installed version.
    pub version: Version,
    /// Install directory.
    pub install_path: PathBuf,
    /// Whether the plugin is enabled.
    pub enabled: bool,
    /// Whether the package signature verified at install time.
    pub signature_verified: bool,
}

/// The install registry for one plugins root.
pub struct InstallRegistry {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, RegistryEntry>>,
}

impl InstallRegistry {
    /// Loads the registry file, or starts empty when it does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let entries = if path.is_file() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Writes the registry atomically.
    pub fn save(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.entries.read())?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Registry saved");
        Ok(())
    }

    /// Records an install and saves.
    pub fn insert(&self, name: impl Into<String>, entry: RegistryEntry) -> Result<(), RegistryError> {
        self.entries.write().insert(name.into(), entry);
        self.save()
    }

    /// Removes a record and saves. Returns the removed entry.
    pub fn remove(&self, name: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        let removed = self.entries.write().remove(name);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    /// Flips a plugin's enabled flag and saves.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool, RegistryError> {
        let found = {
            let mut entries = self.entries.write();
            match entries.get_mut(name) {
                Some(entry) => {
                    entry.enabled = enabled;
                    true
                }
                None => false,
            }
        };
        if found {
            self.save()?;
        }
        Ok(found)
    }

    /// Looks a record up.
    pub fn get(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Snapshot of every record.
    pub fn entries(&self) -> BTreeMap<String, RegistryEntry> {
        self.entries.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: &str, enabled: bool) -> RegistryEntry {
        RegistryEntry {
            version: Version::parse(version).unwrap(),
            install_path: PathBuf::from(format!("/plugins/sample-{version}")),
            enabled,
            signature_verified: false,
        }
    }

    #[test]
    fn test_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("registry.json");

        let registry = InstallRegistry::load(&path).unwrap();
        registry.insert("sample", entry("1.0.0", true)).unwrap();
        registry.insert("other", entry("2.1.0", false)).unwrap();

        let reloaded = InstallRegistry::load(&path).unwrap();
        assert_eq!(reloaded.entries().len(), 2);
        assert!(reloaded.get("sample").unwrap().enabled);
        assert!(!reloaded.get("other").unwrap().enabled);
    }

    #[test]
    fn test_set_enabled_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("registry.json");

        let registry = InstallRegistry::load(&path).unwrap();
        registry.insert("sample", entry("1.0.0", true)).unwrap();
        assert!(registry.set_enabled("sample", false).unwrap());
        assert!(!registry.set_enabled("ghost", false).unwrap());

        let reloaded = InstallRegistry::load(&path).unwrap();
        assert!(!reloaded.get("sample").unwrap().enabled);
    }

    #[test]
    fn test_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("registry.json");

        let registry = InstallRegistry::load(&path).unwrap();
        registry.insert("sample", entry("1.0.0", true)).unwrap();
        assert!(registry.remove("sample").unwrap().is_some());
        assert!(registry.remove("sample").unwrap().is_none());

        let reloaded = InstallRegistry::load(&path).unwrap();
        assert!(reloaded.entries().is_empty());
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = InstallRegistry::load(tmp.path().join("none.json")).unwrap();
        assert!(registry.entries().is_empty());
    }
}
