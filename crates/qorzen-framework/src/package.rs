//! Plugin package handling.
//!
//! A package is a ZIP archive or plain directory with the fixed layout:
//!
//! ```text
//! /manifest.json
//! /code/…
//! /resources/…
//! /docs/…
//! ```
//!
//! Integrity is the SHA-256 of the package: the raw bytes for an archive,
//! or a digest over the files in sorted relative-path order for a
//! directory.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::manifest::{ManifestError, PluginManifest};

/// File name of the manifest at the package root.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Directory holding the plugin's code artifacts.
pub const CODE_DIR: &str = "code";
/// Directory holding static resources.
pub const RESOURCES_DIR: &str = "resources";
/// Directory holding documentation.
pub const DOCS_DIR: &str = "docs";

/// Errors from package access.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The path is neither a directory nor a readable archive.
    #[error("'{path}' is not a plugin package")]
    NotAPackage {
        /// The offending path.
        path: PathBuf,
    },

    /// The package has no `manifest.json` at its root.
    #[error("package has no {MANIFEST_FILE} at its root")]
    MissingManifest,

    /// An archive entry escapes the extraction root.
    #[error("archive entry '{name}' has an unsafe path")]
    UnsafePath {
        /// The offending entry name.
        name: String,
    },

    /// Archive format failure.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Filesystem failure.
    #[error("package I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;

enum PackageSource {
    Directory(PathBuf),
    Archive(PathBuf),
}

/// An opened plugin package.
pub struct PluginPackage {
    source: PackageSource,
}

impl PluginPackage {
    /// Opens a package at `path`: a directory, or a ZIP archive file.
    pub fn open(path: impl AsRef<Path>) -> PackageResult<Self> {
        let path = path.as_ref();
        let source = if path.is_dir() {
            PackageSource::Directory(path.to_path_buf())
        } else if path.is_file() {
            PackageSource::Archive(path.to_path_buf())
        } else {
            return Err(PackageError::NotAPackage {
                path: path.to_path_buf(),
            });
        };
        Ok(Self { source })
    }

    /// Reads the raw manifest JSON from the package root.
    pub fn manifest_json(&self) -> PackageResult<String> {
        match &self.source {
            PackageSource::Directory(dir) => {
                let path = dir.join(MANIFEST_FILE);
                if !path.is_file() {
                    return Err(PackageError::MissingManifest);
                }
                Ok(std::fs::read_to_string(path)?)
            }
            PackageSource::Archive(path) => {
                let mut archive = ZipArchive::new(File::open(path)?)?;
                let mut file = archive
                    .by_name(MANIFEST_FILE)
                    .map_err(|_| PackageError::MissingManifest)?;
                let mut content = String::new();
                file.read_to_string(&mut content)?;
                Ok(content)
            }
        }
    }

    /// Parses and validates the package's manifest.
    pub fn manifest(&self) -> Result<PluginManifest, ManifestError> {
        let json = self
            .manifest_json()
            .map_err(|e| ManifestError::Io(std::io::Error::other(e.to_string())))?;
        PluginManifest::from_json(&json)
    }

    /// SHA-256 digest of the package.
    pub fn sha256(&self) -> PackageResult<[u8; 32]> {
        match &self.source {
            PackageSource::Archive(path) => {
                let bytes = std::fs::read(path)?;
                Ok(Sha256::digest(&bytes).into())
            }
            PackageSource::Directory(dir) => {
                let mut files: Vec<PathBuf> = WalkDir::new(dir)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
                    .collect();
                files.sort();

                let mut hasher = Sha256::new();
                for file in files {
                    let relative = file
                        .strip_prefix(dir)
                        .unwrap_or(&file)
                        .to_string_lossy()
                        .replace('\\', "/");
                    hasher.update(relative.as_bytes());
                    hasher.update([0u8]);
                    hasher.update(std::fs::read(&file)?);
                }
                Ok(hasher.finalize().into())
            }
        }
    }

    /// Extracts (or copies) the package contents into `dest`.
    pub fn extract_to(&self, dest: &Path) -> PackageResult<()> {
        std::fs::create_dir_all(dest)?;
        match &self.source {
            PackageSource::Directory(dir) => {
                for entry in WalkDir::new(dir) {
                    let entry = entry.map_err(|e| {
                        PackageError::Io(std::io::Error::other(e.to_string()))
                    })?;
                    let relative = entry
                        .path()
                        .strip_prefix(dir)
                        .map_err(|e| PackageError::Io(std::io::Error::other(e.to_string())))?;
                    if relative.as_os_str().is_empty() {
                        continue;
                    }
                    let target = dest.join(relative);
                    if entry.file_type().is_dir() {
                        std::fs::create_dir_all(&target)?;
                    } else {
                        if let Some(parent) = target.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::copy(entry.path(), &target)?;
                    }
                }
                Ok(())
            }
            PackageSource::Archive(path) => {
                let mut archive = ZipArchive::new(File::open(path)?)?;
                for index in 0..archive.len() {
                    let mut file = archive.by_index(index)?;
                    let Some(relative) = file.enclosed_name().map(Path::to_path_buf) else {
                        return Err(PackageError::UnsafePath {
                            name: file.name().to_string(),
                        });
                    };
                    let target = dest.join(relative);
                    if file.is_dir() {
                        std::fs::create_dir_all(&target)?;
                    } else {
                        if let Some(parent) = target.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        let mut out = File::create(&target)?;
                        std::io::copy(&mut file, &mut out)?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    const MANIFEST: &str = r#"{
        "name": "sample",
        "version": "1.0.0",
        "description": "A sample plugin",
        "author": { "name": "t" },
        "entry_point": "sample",
        "min_core_version": "0.1.0"
    }"#;

    fn write_dir_package(root: &Path) {
        std::fs::create_dir_all(root.join(CODE_DIR)).unwrap();
        std::fs::create_dir_all(root.join(RESOURCES_DIR)).unwrap();
        std::fs::write(root.join(MANIFEST_FILE), MANIFEST).unwrap();
        std::fs::write(root.join(CODE_DIR).join("main.py"), "print('hi')\n").unwrap();
    }

    fn write_zip_package(path: &Path) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default();
        zip.start_file(MANIFEST_FILE, options).unwrap();
        zip.write_all(MANIFEST.as_bytes()).unwrap();
        zip.add_directory(CODE_DIR, options).unwrap();
        zip.start_file(format!("{CODE_DIR}/main.py"), options).unwrap();
        zip.write_all(b"print('hi')\n").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_directory_package() {
        let tmp = tempfile::tempdir().unwrap();
        write_dir_package(tmp.path());

        let package = PluginPackage::open(tmp.path()).unwrap();
        let manifest = package.manifest().unwrap();
        assert_eq!(manifest.name, "sample");
        assert_eq!(package.sha256().unwrap().len(), 32);
    }

    #[test]
    fn test_zip_package_extracts() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("sample-1.0.0.zip");
        write_zip_package(&archive);

        let package = PluginPackage::open(&archive).unwrap();
        assert_eq!(package.manifest().unwrap().name, "sample");

        let dest = tmp.path().join("out");
        package.extract_to(&dest).unwrap();
        assert!(dest.join(MANIFEST_FILE).is_file());
        assert!(dest.join(CODE_DIR).join("main.py").is_file());
    }

    #[test]
    fn test_directory_digest_is_content_sensitive() {
        let tmp = tempfile::tempdir().unwrap();
        write_dir_package(tmp.path());
        let package = PluginPackage::open(tmp.path()).unwrap();
        let before = package.sha256().unwrap();

        std::fs::write(tmp.path().join(CODE_DIR).join("main.py"), "print('bye')\n").unwrap();
        let after = package.sha256().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_missing_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let package = PluginPackage::open(tmp.path()).unwrap();
        assert!(matches!(
            package.manifest_json(),
            Err(PackageError::MissingManifest)
        ));
    }

    #[test]
    fn test_missing_path() {
        assert!(matches!(
            PluginPackage::open("/does/not/exist"),
            Err(PackageError::NotAPackage { .. })
        ));
    }
}
