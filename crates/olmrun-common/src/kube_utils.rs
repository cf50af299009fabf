//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction, label selectors for the installation record, and
//! conversions between typed resources and `DynamicObject`s.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kube::api::{DynamicObject, ObjectMeta};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, OWNER_LABEL_KEY, OWNER_LABEL_VALUE, PACKAGE_NAME_LABEL_KEY};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Load a kube `Config` from an optional kubeconfig path.
///
/// With no path the config is inferred (`KUBECONFIG`, `~/.kube/config`, then
/// in-cluster service account).
pub async fn load_config(kubeconfig: Option<&Path>) -> Result<Config, Error> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer config: {}", e))),
    }
}

/// Build a client from a loaded config with custom timeouts
pub fn client_from_config(
    mut config: Config,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| Error::config(format!("failed to create client: {}", e)))
}

/// `ApiResource` for a statically typed resource
pub fn api_resource<K>() -> ApiResource
where
    K: Resource<DynamicType = ()>,
{
    ApiResource::erase::<K>(&())
}

/// `ApiResource` for a resource known only by apiVersion, kind and plural
pub fn build_api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// Clear fields the API server owns so a manifest can be created as new
pub fn strip_server_metadata(meta: &mut ObjectMeta) {
    meta.uid = None;
    meta.resource_version = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.managed_fields = None;
    meta.generation = None;
    meta.owner_references = None;
}

/// Labels that mark an object as part of an olmrun-installed package
pub fn package_labels(package: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_LABEL_KEY.to_string(), OWNER_LABEL_VALUE.to_string()),
        (PACKAGE_NAME_LABEL_KEY.to_string(), package.to_string()),
    ])
}

/// Format an equality-based label selector (`k1=v1,k2=v2`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Label selector matching every object of an olmrun-installed package
pub fn package_selector(package: &str) -> String {
    label_selector(&package_labels(package))
}

/// Longest value the API server accepts for a label
pub const MAX_LABEL_VALUE_LEN: usize = 63;

/// Check that `value` is a valid label value
///
/// A label value is at most 63 characters of `[A-Za-z0-9_.-]` and starts and
/// ends with an alphanumeric character. The error names the broken rule.
pub fn validate_label_value(value: &str) -> Result<(), String> {
    if value.len() > MAX_LABEL_VALUE_LEN {
        return Err(format!(
            "must be at most {} characters, got {}",
            MAX_LABEL_VALUE_LEN,
            value.len()
        ));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("contains invalid character {:?}", c));
    }
    let alphanumeric = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !value.is_empty() && !(alphanumeric(value.chars().next()) && alphanumeric(value.chars().last())) {
        return Err("must start and end with an alphanumeric character".to_string());
    }
    Ok(())
}

/// Whether a kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Whether a kube error is an API 409 (already exists / conflict)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Convert a raw manifest value into a `DynamicObject`
pub fn to_dynamic(value: serde_json::Value) -> Result<DynamicObject, Error> {
    let kind = value
        .get("kind")
        .and_then(|k| k.as_str())
        .unwrap_or("unknown")
        .to_string();
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// Convert a typed resource into a `DynamicObject`
pub fn typed_to_dynamic<K>(resource: &K) -> Result<DynamicObject, Error>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let value = serde_json::to_value(resource)
        .map_err(|e| Error::serialization_for_kind(K::kind(&()), e.to_string()))?;
    to_dynamic(value)
}

/// Parse a `DynamicObject` into a typed resource
pub fn from_dynamic<K>(obj: DynamicObject) -> Result<K, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let value = serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(K::kind(&()), e.to_string()))?;
    serde_json::from_value(value)
        .map_err(|e| Error::serialization_for_kind(K::kind(&()), e.to_string()))
}
