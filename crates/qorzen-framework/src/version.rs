//! Version range syntax for plugin dependencies.
//!
//! Supported operators: `=X.Y.Z`, `>X.Y.Z`, `>=X.Y.Z`, `<X.Y.Z`, `<=X.Y.Z`,
//! `^X.Y.Z` (same major, at least the given version) and `~X.Y.Z` (same
//! minor, at least the given version). Evaluation is delegated to the
//! `semver` crate, whose caret/tilde semantics match this table.

use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed version range.
#[derive(Debug, Clone, Error)]
#[error("invalid version range '{range}': {reason}")]
pub struct VersionRangeError {
    /// The offending input.
    pub range: String,
    /// Why it was rejected.
    pub reason: String,
}

/// A parsed dependency version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    req: VersionReq,
}

impl VersionRange {
    /// Parses a range. The operator must be explicit (`>=1.2.0`, `^1.0.0`);
    /// a bare version is shorthand for `=`.
    pub fn parse(input: &str) -> Result<Self, VersionRangeError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionRangeError {
                range: input.to_string(),
                reason: "empty range".to_string(),
            });
        }

        let normalized = match trimmed.chars().next().unwrap() {
            '=' | '>' | '<' | '^' | '~' => trimmed.to_string(),
            c if c.is_ascii_digit() => format!("={trimmed}"),
            _ => {
                return Err(VersionRangeError {
                    range: input.to_string(),
                    reason: "unknown operator".to_string(),
                });
            }
        };

        let req = VersionReq::parse(&normalized).map_err(|e| VersionRangeError {
            range: input.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            raw: trimmed.to_string(),
            req,
        })
    }

    /// Whether `version` satisfies the range.
    pub fn matches(&self, version: &Version) -> bool {
        self.req.matches(version)
    }

    /// The original range text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for VersionRange {
    type Err = VersionRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
