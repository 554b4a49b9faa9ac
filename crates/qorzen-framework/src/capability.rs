//! The closed capability set and its risk levels.
//!
//! A plugin may only perform actions covered by its declared capabilities.
//! Checks happen at the platform API surface (config writes, event
//! publication, task submission), never inside plugin code; a missing
//! capability fails with [`PluginError::PermissionDenied`] and has no side
//! effects.
//!
//! [`PluginError::PermissionDenied`]: crate::error::PluginError::PermissionDenied

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// How much damage a misbehaving holder of the capability could do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// The closed enumeration of plugin capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Read configuration values.
    #[serde(rename = "config.read")]
    ConfigRead,
    /// Mutate configuration values.
    #[serde(rename = "config.write")]
    ConfigWrite,
    /// Add UI elements.
    #[serde(rename = "ui.extend")]
    UiExtend,
    /// Subscribe to events.
    #[serde(rename = "event.subscribe")]
    EventSubscribe,
    /// Publish events.
    #[serde(rename = "event.publish")]
    EventPublish,
    /// Read from the plugin data directory.
    #[serde(rename = "file.read")]
    FileRead,
    /// Write to the plugin data directory.
    #[serde(rename = "file.write")]
    FileWrite,
    /// Open outbound network connections.
    #[serde(rename = "network.connect")]
    NetworkConnect,
    /// Read through the database manager.
    #[serde(rename = "database.read")]
    DatabaseRead,
    /// Write through the database manager.
    #[serde(rename = "database.write")]
    DatabaseWrite,
    /// Spawn external processes.
    #[serde(rename = "system.exec")]
    SystemExec,
    /// Read system metrics.
    #[serde(rename = "system.monitor")]
    SystemMonitor,
    /// Call other plugins' extension points.
    #[serde(rename = "plugin.communicate")]
    PluginCommunicate,
}

impl Capability {
    /// The capability's fixed risk level.
    pub fn risk(&self) -> RiskLevel {
        match self {
            Self::ConfigRead
            | Self::UiExtend
            | Self::EventSubscribe
            | Self::EventPublish
            | Self::FileRead
            | Self::SystemMonitor
            | Self::PluginCommunicate => RiskLevel::Low,
            Self::ConfigWrite | Self::NetworkConnect | Self::DatabaseRead => RiskLevel::Medium,
            Self::FileWrite | Self::DatabaseWrite | Self::SystemExec => RiskLevel::High,
        }
    }

    /// The dotted wire name (`config.read`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigRead => "config.read",
            Self::ConfigWrite => "config.write",
            Self::UiExtend => "ui.extend",
            Self::EventSubscribe => "event.subscribe",
            Self::EventPublish => "event.publish",
            Self::FileRead => "file.read",
            Self::FileWrite => "file.write",
            Self::NetworkConnect => "network.connect",
            Self::DatabaseRead => "database.read",
            Self::DatabaseWrite => "database.write",
            Self::SystemExec => "system.exec",
            Self::SystemMonitor => "system.monitor",
            Self::PluginCommunicate => "plugin.communicate",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The set of capabilities a plugin declared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set grants `capability`.
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Fails with `PermissionDenied` when `capability` is not granted.
    pub fn require(&self, plugin: &str, capability: Capability) -> Result<(), PluginError> {
        if self.contains(capability) {
            Ok(())
        } else {
            Err(PluginError::PermissionDenied {
                plugin: plugin.to_string(),
                capability,
            })
        }
    }

    /// The highest risk level among the granted capabilities.
    pub fn max_risk(&self) -> Option<RiskLevel> {
        self.0.iter().map(Capability::risk).max()
    }

    /// Iterates the granted capabilities.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
