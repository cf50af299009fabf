//! Installation record
//!
//! A package counts as installed while config maps labeled
//! `owner=operator-sdk,package-name=<package>` exist in the install
//! namespace. The record is:
//!
//! - `<package>-package`: the package index in the layout OLM's
//!   `configmap` catalog source reads (`packages`,
//!   `clusterServiceVersions`, `customResourceDefinitions`);
//! - `<package>-v<version>`: one per release, holding that release's
//!   manifest files as read from disk and labeled `operator-version`.
//!
//! The record is an ordinary object read back through a list call, not a
//! transaction. Two installs racing on an empty namespace can both observe
//! "no record" before either creates one; the loser then fails on the
//! create of an object the winner already made. Likewise a list issued
//! right after an uninstall may still see config maps the API server has
//! accepted for deletion but not yet removed, which is why uninstall polls
//! the record until it is empty rather than trusting its own deletes.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ListParams, ObjectMeta};
use kube::ResourceExt;
use serde_json::Value;
use tracing::warn;

use olmrun_common::kube_utils::{package_labels, package_selector};
use olmrun_common::yaml::parse_documents;
use olmrun_common::{Error, Result, OPERATOR_VERSION_LABEL_KEY};

use crate::client::{list_typed, ResourceClient, Scope};
use crate::manifests::PackageBundle;

/// Data key holding the package index list
pub const PACKAGES_KEY: &str = "packages";
/// Data key holding every CSV of the package
pub const CSVS_KEY: &str = "clusterServiceVersions";
/// Data key holding every CRD of the package
pub const CRDS_KEY: &str = "customResourceDefinitions";

/// Name of the package index config map
pub fn package_config_map_name(package: &str) -> String {
    format!("{}-package", package)
}

/// Name of the config map holding one release
pub fn bundle_config_map_name(package: &str, version: &str) -> String {
    format!("{}-v{}", package, sanitize_name(version))
}

/// Name of the catalog source serving the package index
pub fn catalog_source_name(package: &str) -> String {
    format!("{}-ocs", package)
}

/// Build the record config maps for a package
pub fn build_record(bundle: &PackageBundle, namespace: &str) -> Result<Vec<ConfigMap>> {
    let package = bundle.package_name();
    let mut maps = Vec::with_capacity(bundle.versions.len() + 1);

    let mut crds: BTreeMap<String, &Value> = BTreeMap::new();
    for version in &bundle.versions {
        for crd in &version.crds {
            if let Some(name) = crd.pointer("/metadata/name").and_then(Value::as_str) {
                // Later releases ship newer CRD versions.
                crds.insert(name.to_string(), crd);
            }
        }
    }
    let csvs: Vec<&Value> = bundle.versions.iter().map(|v| &v.raw_csv).collect();

    let index = BTreeMap::from([
        (PACKAGES_KEY.to_string(), to_json(&[&bundle.manifest])?),
        (CSVS_KEY.to_string(), to_json(&csvs)?),
        (
            CRDS_KEY.to_string(),
            to_json(&crds.values().collect::<Vec<_>>())?,
        ),
    ]);
    maps.push(config_map(
        package_config_map_name(package),
        namespace,
        package_labels(package),
        index,
    ));

    let mut names: BTreeMap<String, &str> = BTreeMap::new();
    for version in &bundle.versions {
        let name = bundle_config_map_name(package, &version.version);
        if let Some(other) = names.insert(name.clone(), &version.version) {
            return Err(Error::precondition(
                package,
                format!(
                    "versions {} and {} both map to config map {}",
                    other, version.version, name
                ),
            ));
        }

        let mut labels = package_labels(package);
        labels.insert(
            OPERATOR_VERSION_LABEL_KEY.to_string(),
            sanitize_label_value(&version.version),
        );
        let data = version
            .files
            .iter()
            .map(|f| (sanitize_key(&f.name), f.content.clone()))
            .collect();
        maps.push(config_map(name, namespace, labels, data));
    }
    Ok(maps)
}

/// List the record config maps of a package
pub async fn list_record(
    client: &dyn ResourceClient,
    namespace: &str,
    package: &str,
) -> Result<Vec<ConfigMap>> {
    let params = ListParams::default().labels(&package_selector(package));
    list_typed(client, &Scope::namespaced(namespace), &params)
        .await
        .map_err(|e| Error::read("ConfigMap", e))
}

/// CSV and CRD names found in a record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordedObjects {
    /// ClusterServiceVersion names
    pub csvs: BTreeSet<String>,
    /// CustomResourceDefinition names, including CRDs CSVs declare as owned
    pub crds: BTreeSet<String>,
}

/// Recover the CSVs and CRDs an install created from its record
///
/// Unparseable entries are skipped; the record is written by install and a
/// damaged entry should not block cleanup of the rest.
pub fn recorded_objects(maps: &[ConfigMap]) -> RecordedObjects {
    let mut found = RecordedObjects::default();
    for map in maps {
        for (key, content) in map.data.iter().flatten() {
            let docs = match parse_documents(content) {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(config_map = %map.name_any(), key = %key, error = %e, "skipping unparseable record entry");
                    continue;
                }
            };
            for doc in docs {
                match doc {
                    Value::Array(items) => items.iter().for_each(|item| collect(item, &mut found)),
                    other => collect(&other, &mut found),
                }
            }
        }
    }
    found
}

fn collect(doc: &Value, found: &mut RecordedObjects) {
    let name = doc.pointer("/metadata/name").and_then(Value::as_str);
    match (doc.get("kind").and_then(Value::as_str), name) {
        (Some("ClusterServiceVersion"), Some(name)) => {
            found.csvs.insert(name.to_string());
            let owned = doc
                .pointer("/spec/customresourcedefinitions/owned")
                .and_then(Value::as_array);
            for crd in owned.into_iter().flatten() {
                if let Some(crd_name) = crd.get("name").and_then(Value::as_str) {
                    found.crds.insert(crd_name.to_string());
                }
            }
        }
        (Some("CustomResourceDefinition"), Some(name)) => {
            found.crds.insert(name.to_string());
        }
        _ => {}
    }
}

fn config_map(
    name: String,
    namespace: &str,
    labels: BTreeMap<String, String>,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))
}

// Object names: lowercase alphanumerics, '-' and '.'.
fn sanitize_name(value: &str) -> String {
    value
        .to_ascii_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '.' => c,
            _ => '-',
        })
        .collect()
}

// Config map keys: alphanumerics, '-', '_' and '.'.
fn sanitize_key(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '-',
        })
        .collect()
}

// Label values: at most 63 chars, alphanumeric at both ends.
fn sanitize_label_value(value: &str) -> String {
    let cleaned = sanitize_key(value);
    let trimmed: String = cleaned.chars().take(63).collect();
    trimmed
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}
