//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::Value;

use qorzen::framework::entry::{PluginEntry, PluginRuntimeContext};
use qorzen::core::BoxError;

/// Writes a `qorzen.yaml` rooting all plugin state under `dir` and sizing
/// the CPU pool to one worker (deterministic scheduling in tests). `extra`
/// is appended verbatim.
pub fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let plugins_root = dir.join("plugins");
    let content = format!(
        "core:\n  plugins_root: \"{}\"\nconcurrency:\n  cpu_workers: 1\n  io_workers: 2\n  main_thread: false\n{extra}",
        plugins_root.display()
    );
    let path = dir.join("qorzen.yaml");
    std::fs::write(&path, content).unwrap();
    path
}

/// Builds a plugin package directory (manifest + `code/`) under `root` and
/// returns its path.
pub fn write_plugin_package(root: &Path, dir_name: &str, manifest_json: &str) -> PathBuf {
    let package = root.join(dir_name);
    std::fs::create_dir_all(package.join("code")).unwrap();
    std::fs::create_dir_all(package.join("resources")).unwrap();
    std::fs::write(package.join("manifest.json"), manifest_json).unwrap();
    std::fs::write(package.join("code").join("main.txt"), "payload\n").unwrap();
    package
}

/// Renders a minimal manifest with optional capability, dependency, and
/// hook blocks (pass raw JSON fragments, or "" to omit).
pub fn manifest_json(
    name: &str,
    version: &str,
    capabilities: &str,
    dependencies: &str,
    hooks: &str,
) -> String {
    let mut body = format!(
        r#""name": "{name}",
        "version": "{version}",
        "description": "test plugin",
        "author": {{ "name": "tests" }},
        "entry_point": "{name}",
        "min_core_version": "0.1.0""#
    );
    if !capabilities.is_empty() {
        body.push_str(&format!(",\n        \"capabilities\": {capabilities}"));
    }
    if !dependencies.is_empty() {
        body.push_str(&format!(",\n        \"dependencies\": {dependencies}"));
    }
    if !hooks.is_empty() {
        body.push_str(&format!(",\n        \"lifecycle_hooks\": {hooks}"));
    }
    format!("{{ {body} }}")
}

/// A minimal entry that echoes method arguments.
pub struct EchoEntry;

impl PluginEntry for EchoEntry {
    fn on_load(&mut self, _ctx: &PluginRuntimeContext) -> Result<(), BoxError> {
        Ok(())
    }

    fn call(&mut self, method: &str, args: Value) -> Result<Value, BoxError> {
        match method {
            "echo" => Ok(args),
            _ => Err(format!("unknown method '{method}'").into()),
        }
    }
}

/// Entry factory used by every test plugin.
pub fn echo_entry() -> Box<dyn PluginEntry> {
    Box::new(EchoEntry)
}
