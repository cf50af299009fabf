//! Package manifest loader
//!
//! Reads a directory in the packagemanifests layout:
//!
//! ```text
//! memcached-operator/
//!   memcached-operator.package.yaml
//!   0.0.2/
//!     memcached-operator.v0.0.2.clusterserviceversion.yaml
//!     cache.example.com_memcacheds_crd.yaml
//!   0.0.3/
//!     ...
//! ```
//!
//! Every YAML document is classified by `kind`. A version directory must
//! hold exactly one ClusterServiceVersion and any number of CRDs; other
//! kinds are skipped.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use olmrun_common::crd::ClusterServiceVersion;
use olmrun_common::yaml::parse_documents;
use olmrun_common::{Error, Result};

const CSV_KIND: &str = "ClusterServiceVersion";
const CRD_KIND: &str = "CustomResourceDefinition";
const MANIFEST_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Package index: the package name and its channels
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    /// Package name
    pub package_name: String,
    /// Channels, in file order
    #[serde(default)]
    pub channels: Vec<PackageChannel>,
    /// Channel subscriptions use when none is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,
}

impl PackageManifest {
    /// The default channel, or the only channel when there is just one
    pub fn default_channel_name(&self) -> Option<&str> {
        match (&self.default_channel, self.channels.as_slice()) {
            (Some(name), _) => Some(name),
            (None, [only]) => Some(&only.name),
            _ => None,
        }
    }

    /// Look up a channel by name
    pub fn channel(&self, name: &str) -> Option<&PackageChannel> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// A named pointer to the recommended CSV
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PackageChannel {
    /// Channel name
    pub name: String,
    /// CSV at the head of the channel
    #[serde(rename = "currentCSV")]
    pub current_csv: String,
}

/// A manifest file as read from disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestFile {
    /// File name, without directory
    pub name: String,
    /// Raw file content
    pub content: String,
}

/// One release of the operator: its CSV and the CRDs shipped with it
#[derive(Clone, Debug)]
pub struct ServiceVersion {
    /// CSV name (`<package>.v<version>`)
    pub name: String,
    /// Release version from `spec.version`, or the directory name
    pub version: String,
    /// Typed view of the CSV
    pub csv: ClusterServiceVersion,
    /// CSV exactly as written, used when creating it on the cluster
    pub raw_csv: Value,
    /// CRD documents shipped with this release
    pub crds: Vec<Value>,
    /// Version directory
    pub directory: PathBuf,
    /// Files the release was read from
    pub files: Vec<ManifestFile>,
}

impl ServiceVersion {
    /// Name of the CSV this release replaces
    pub fn replaces(&self) -> Option<&str> {
        self.csv.replaces()
    }

    fn matches_version(&self, version: &str) -> bool {
        let version = version.trim();
        let bare = version.strip_prefix('v').unwrap_or(version);
        self.version == version || self.version == bare || self.name == version
    }
}

/// A loaded package directory
#[derive(Clone, Debug)]
pub struct PackageBundle {
    /// Directory the package was loaded from
    pub directory: PathBuf,
    /// Package index
    pub manifest: PackageManifest,
    /// Releases, ordered by directory name
    pub versions: Vec<ServiceVersion>,
}

impl PackageBundle {
    /// Package name
    pub fn package_name(&self) -> &str {
        &self.manifest.package_name
    }

    /// Find a release by CSV name
    pub fn find_csv(&self, name: &str) -> Option<&ServiceVersion> {
        self.versions.iter().find(|v| v.name == name)
    }

    /// Find a release by version (`0.0.2`, `v0.0.2`) or CSV name
    pub fn find_version(&self, version: &str) -> Option<&ServiceVersion> {
        self.versions.iter().find(|v| v.matches_version(version))
    }

    /// Upgrade lineage starting at `csv_name`, newest first
    ///
    /// The walk follows `replaces` while the replaced CSV is part of the
    /// package and stops at the first one that is not.
    pub fn lineage(&self, csv_name: &str) -> Result<Vec<&ServiceVersion>> {
        let mut lineage: Vec<&ServiceVersion> = Vec::new();
        let mut next = Some(csv_name);
        while let Some(name) = next {
            let Some(version) = self.find_csv(name) else {
                break;
            };
            if lineage.iter().any(|v| v.name == version.name) {
                return Err(Error::manifest(
                    &self.directory,
                    format!("replaces chain starting at {} forms a cycle", csv_name),
                ));
            }
            lineage.push(version);
            next = version.replaces();
        }
        Ok(lineage)
    }
}

/// Load and validate a package directory
pub fn load_package(dir: impl AsRef<Path>) -> Result<PackageBundle> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::manifest(dir, "not a directory"));
    }

    let mut package: Option<(PackageManifest, String)> = None;
    let mut versions = Vec::new();

    for path in sorted_entries(dir)? {
        if path.is_dir() {
            if is_hidden(&path) {
                continue;
            }
            versions.push(load_version(&path)?);
        } else if is_manifest_file(&path) {
            let file = read_manifest_file(&path)?;
            for doc in parse_file(&path, &file.content)? {
                if doc.get("packageName").is_none() {
                    debug!(path = %path.display(), "skipping non-package document at package root");
                    continue;
                }
                if let Some((existing, existing_file)) = &package {
                    return Err(Error::manifest(
                        dir,
                        format!(
                            "multiple package manifests: {} ({}) and {}",
                            existing.package_name,
                            existing_file,
                            file.name
                        ),
                    ));
                }
                let manifest: PackageManifest = serde_json::from_value(doc)
                    .map_err(|e| Error::manifest(&path, format!("invalid package manifest: {}", e)))?;
                package = Some((manifest, file.name.clone()));
            }
        }
    }

    let (manifest, _) =
        package.ok_or_else(|| Error::manifest(dir, "no package manifest found"))?;

    let bundle = PackageBundle {
        directory: dir.to_path_buf(),
        manifest,
        versions,
    };
    validate_bundle(&bundle)?;

    debug!(
        package = %bundle.package_name(),
        versions = bundle.versions.len(),
        channels = bundle.manifest.channels.len(),
        "loaded package manifests"
    );
    Ok(bundle)
}

fn load_version(dir: &Path) -> Result<ServiceVersion> {
    let mut csvs: Vec<Value> = Vec::new();
    let mut crds = Vec::new();
    let mut files = Vec::new();

    for path in sorted_entries(dir)? {
        if !path.is_file() || !is_manifest_file(&path) {
            continue;
        }
        let file = read_manifest_file(&path)?;
        for doc in parse_file(&path, &file.content)? {
            match doc.get("kind").and_then(Value::as_str) {
                Some(CSV_KIND) => csvs.push(doc),
                Some(CRD_KIND) => crds.push(doc),
                other => {
                    debug!(path = %path.display(), kind = ?other, "skipping unsupported manifest kind")
                }
            }
        }
        files.push(file);
    }

    let raw_csv = match csvs.len() {
        1 => csvs.remove(0),
        0 => return Err(Error::manifest(dir, "no ClusterServiceVersion found")),
        n => {
            return Err(Error::manifest(
                dir,
                format!("expected one ClusterServiceVersion, found {}", n),
            ))
        }
    };
    let csv: ClusterServiceVersion = serde_json::from_value(raw_csv.clone())
        .map_err(|e| Error::manifest(dir, format!("invalid ClusterServiceVersion: {}", e)))?;

    let name = csv.name_any();
    if name.is_empty() {
        return Err(Error::manifest(dir, "ClusterServiceVersion has no name"));
    }
    let version = csv
        .spec
        .version
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();

    Ok(ServiceVersion {
        name,
        version,
        csv,
        raw_csv,
        crds,
        directory: dir.to_path_buf(),
        files,
    })
}

fn validate_bundle(bundle: &PackageBundle) -> Result<()> {
    let dir = &bundle.directory;
    let manifest = &bundle.manifest;

    if manifest.package_name.trim().is_empty() {
        return Err(Error::manifest(dir, "package name must not be empty"));
    }
    if manifest.channels.is_empty() {
        return Err(Error::manifest(dir, "package must declare at least one channel"));
    }

    let mut channel_names = HashSet::new();
    for channel in &manifest.channels {
        if !channel_names.insert(channel.name.as_str()) {
            return Err(Error::manifest(
                dir,
                format!("duplicate channel {}", channel.name),
            ));
        }
    }

    let mut csv_names = HashSet::new();
    for version in &bundle.versions {
        if !csv_names.insert(version.name.as_str()) {
            return Err(Error::manifest(
                &version.directory,
                format!("duplicate ClusterServiceVersion {}", version.name),
            ));
        }
    }

    for channel in &manifest.channels {
        if bundle.find_csv(&channel.current_csv).is_none() {
            return Err(Error::manifest(
                dir,
                format!(
                    "channel {} points at {} which is not in the package",
                    channel.name, channel.current_csv
                ),
            ));
        }
    }

    if let Some(default) = &manifest.default_channel {
        if manifest.channel(default).is_none() {
            return Err(Error::manifest(
                dir,
                format!("default channel {} is not declared", default),
            ));
        }
    }

    for version in &bundle.versions {
        bundle.lineage(&version.name)?;
    }
    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::manifest(dir, e.to_string()))?;
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::manifest(dir, e.to_string()))?;
    paths.sort();
    Ok(paths)
}

fn read_manifest_file(path: &Path) -> Result<ManifestFile> {
    let content = fs::read_to_string(path).map_err(|e| Error::manifest(path, e.to_string()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ManifestFile { name, content })
}

fn parse_file(path: &Path, content: &str) -> Result<Vec<Value>> {
    parse_documents(content).map_err(|e| Error::manifest(path, e.to_string()))
}

fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MANIFEST_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
