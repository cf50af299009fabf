//! Test doubles: package directory writers and an in-memory cluster

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kube::api::{DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::ResourceExt;
use serde_json::json;

use olmrun_common::crd::InstallModeType;
use olmrun_common::Error;

use crate::client::{ResourceClient, Scope};

pub(crate) const MEMCACHED: &str = "memcached-operator";
pub(crate) const MEMCACHED_CRD: &str = "memcacheds.cache.example.com";

// =============================================================================
// Package directories
// =============================================================================

/// One release written into a test package directory
#[derive(Clone, Debug)]
pub(crate) struct CsvFixture {
    pub package: String,
    pub version: String,
    pub replaces: Option<String>,
    pub install_modes: Vec<InstallModeType>,
    pub crd_versions: Vec<String>,
}

/// memcached-operator release supporting only AllNamespaces
pub(crate) fn memcached(version: &str) -> CsvFixture {
    CsvFixture {
        package: MEMCACHED.to_string(),
        version: version.to_string(),
        replaces: None,
        install_modes: vec![InstallModeType::AllNamespaces],
        crd_versions: vec!["v1alpha1".to_string()],
    }
}

impl CsvFixture {
    pub fn csv_name(&self) -> String {
        format!("{}.v{}", self.package, self.version)
    }

    pub fn replacing(mut self, version: &str) -> Self {
        self.replaces = Some(format!("{}.v{}", self.package, version));
        self
    }

    pub fn with_modes(mut self, modes: &[InstallModeType]) -> Self {
        self.install_modes = modes.to_vec();
        self
    }

    pub fn with_crd_versions(mut self, versions: &[&str]) -> Self {
        self.crd_versions = versions.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn csv_yaml(&self) -> String {
        let modes: String = InstallModeType::ALL
            .iter()
            .map(|mode| {
                format!(
                    "  - type: {}\n    supported: {}\n",
                    mode,
                    self.install_modes.contains(mode)
                )
            })
            .collect();
        let replaces = self
            .replaces
            .as_ref()
            .map(|r| format!("  replaces: {}\n", r))
            .unwrap_or_default();
        let storage_version = self.crd_versions.last().map(String::as_str).unwrap_or("v1alpha1");
        format!(
            "apiVersion: operators.coreos.com/v1alpha1
kind: ClusterServiceVersion
metadata:
  name: {name}
  annotations:
    capabilities: Basic Install
spec:
  displayName: Memcached Operator
  version: {version}
{replaces}  installModes:
{modes}  customresourcedefinitions:
    owned:
    - name: {crd}
      version: {storage_version}
      kind: Memcached
  install:
    strategy: deployment
    spec:
      deployments:
      - name: {package}
        spec:
          replicas: 1
          selector:
            matchLabels:
              name: {package}
          template:
            metadata:
              labels:
                name: {package}
            spec:
              containers:
              - name: operator
                image: quay.io/example/{package}:v{version}
",
            name = self.csv_name(),
            version = self.version,
            package = self.package,
            crd = MEMCACHED_CRD,
        )
    }

    pub fn crd_yaml(&self) -> String {
        let last = self.crd_versions.len().saturating_sub(1);
        let versions: String = self
            .crd_versions
            .iter()
            .enumerate()
            .map(|(i, v)| {
                format!(
                    "  - name: {}\n    served: true\n    storage: {}\n    schema:\n      openAPIV3Schema:\n        type: object\n        x-kubernetes-preserve-unknown-fields: true\n",
                    v,
                    i == last
                )
            })
            .collect();
        format!(
            "apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: {crd}
spec:
  group: cache.example.com
  names:
    kind: Memcached
    listKind: MemcachedList
    plural: memcacheds
    singular: memcached
  scope: Namespaced
  versions:
{versions}",
            crd = MEMCACHED_CRD,
        )
    }
}

/// Write a packagemanifests directory under `root`, returning its path
pub(crate) fn write_package_dir(
    root: &Path,
    package: &str,
    csvs: &[CsvFixture],
    channels: &[(&str, &str)],
) -> PathBuf {
    let dir = root.join(package);
    for csv in csvs {
        let version_dir = dir.join(&csv.version);
        fs::create_dir_all(&version_dir).expect("create version dir");
        fs::write(
            version_dir.join(format!("{}.clusterserviceversion.yaml", csv.csv_name())),
            csv.csv_yaml(),
        )
        .expect("write csv");
        fs::write(
            version_dir.join("cache.example.com_memcacheds_crd.yaml"),
            csv.crd_yaml(),
        )
        .expect("write crd");
    }

    fs::create_dir_all(&dir).expect("create package dir");
    let mut package_yaml = format!("packageName: {}\n", package);
    match channels.first() {
        None => package_yaml.push_str("channels: []\n"),
        Some((default, _)) => {
            package_yaml.push_str("channels:\n");
            for (name, current) in channels {
                package_yaml.push_str(&format!("- name: {}\n  currentCSV: {}\n", name, current));
            }
            package_yaml.push_str(&format!("defaultChannel: {}\n", default));
        }
    }
    fs::write(dir.join(format!("{}.package.yaml", package)), package_yaml)
        .expect("write package manifest");
    dir
}

// =============================================================================
// In-memory cluster
// =============================================================================

/// How CSVs created on the fake cluster progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CsvBehavior {
    /// Succeeded as soon as it is read
    Succeed,
    /// Pending for the first `n` reads, then Succeeded
    SucceedAfter(u32),
    /// Failed with a reason and message
    Fail,
    /// Pending forever
    StayPending,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    group: String,
    plural: String,
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    fn new(ar: &ApiResource, scope: &Scope, name: &str) -> Self {
        Self {
            group: ar.group.clone(),
            plural: ar.plural.clone(),
            namespace: scope.namespace().map(str::to_string),
            name: name.to_string(),
        }
    }

    fn is_resource(&self, ar: &ApiResource) -> bool {
        self.group == ar.group && self.plural == ar.plural
    }

    fn in_scope(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Cluster => true,
            Scope::Namespaced(ns) => self.namespace.as_deref() == Some(ns.as_str()),
        }
    }
}

struct FakeState {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    // Deleted objects stay visible for this many more list calls.
    terminating: BTreeMap<ObjectKey, u32>,
    csv_reads: BTreeMap<ObjectKey, u32>,
    csv_behavior: CsvBehavior,
    deletion_lag: u32,
    failing_creates: Vec<String>,
    failing_deletes: Vec<String>,
    failing_reads: bool,
    mutations: Vec<String>,
    next_uid: u64,
}

/// In-memory stand-in for the cluster API
pub(crate) struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                objects: BTreeMap::new(),
                terminating: BTreeMap::new(),
                csv_reads: BTreeMap::new(),
                csv_behavior: CsvBehavior::Succeed,
                deletion_lag: 0,
                failing_creates: Vec::new(),
                failing_deletes: Vec::new(),
                failing_reads: false,
                mutations: Vec::new(),
                next_uid: 1,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake cluster lock poisoned")
    }

    pub fn with_csv_behavior(self, behavior: CsvBehavior) -> Self {
        self.state().csv_behavior = behavior;
        self
    }

    /// Deleted objects remain listed for `lists` more list calls
    pub fn with_deletion_lag(self, lists: u32) -> Self {
        self.state().deletion_lag = lists;
        self
    }

    pub fn fail_creates_of(&self, kind: &str) {
        self.state().failing_creates.push(kind.to_string());
    }

    pub fn fail_deletes_of(&self, kind: &str) {
        self.state().failing_deletes.push(kind.to_string());
    }

    pub fn fail_reads(&self, failing: bool) {
        self.state().failing_reads = failing;
    }

    /// Every create and delete issued, as `"<verb> <Kind> <name>"`
    pub fn mutations(&self) -> Vec<String> {
        self.state().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    /// Names of the live objects of `kind`, in any namespace
    pub fn names(&self, kind: &str) -> Vec<String> {
        self.state()
            .objects
            .iter()
            .filter(|(_, obj)| obj.types.as_ref().map(|t| t.kind.as_str()) == Some(kind))
            .map(|(key, _)| key.name.clone())
            .collect()
    }

    pub fn object(&self, kind: &str, name: &str) -> Option<DynamicObject> {
        self.state()
            .objects
            .iter()
            .find(|(key, obj)| {
                key.name == name && obj.types.as_ref().map(|t| t.kind.as_str()) == Some(kind)
            })
            .map(|(_, obj)| obj.clone())
    }

    /// Store an object directly, without recording a mutation
    pub fn seed(&self, ar: &ApiResource, scope: &Scope, mut obj: DynamicObject) {
        obj.metadata.namespace = scope.namespace().map(str::to_string);
        let key = ObjectKey::new(ar, scope, &obj.name_any());
        self.state().objects.insert(key, obj);
    }
}

/// Whether a label map satisfies an equality-based selector
///
/// Only `k=v` and `k==v` terms are understood; an empty selector matches
/// everything.
fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            let (key, value) = match term.split_once("==") {
                Some(kv) => kv,
                None => term.split_once('=').unwrap_or((term, "")),
            };
            labels.get(key.trim()).map(String::as_str) == Some(value.trim())
        })
}

fn unavailable() -> Error {
    Error::internal_with_context("fake-cluster", "connection refused")
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube {
        source: kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message,
            reason: reason.to_string(),
            code,
        }),
    }
}

impl FakeState {
    fn observe_csv(&mut self, key: &ObjectKey) {
        let reads = self.csv_reads.entry(key.clone()).or_insert(0);
        *reads += 1;
        let status = match self.csv_behavior {
            CsvBehavior::Succeed => json!({"phase": "Succeeded", "reason": "InstallSucceeded"}),
            CsvBehavior::SucceedAfter(n) if *reads > n => {
                json!({"phase": "Succeeded", "reason": "InstallSucceeded"})
            }
            CsvBehavior::SucceedAfter(_) | CsvBehavior::StayPending => {
                json!({"phase": "Pending", "reason": "RequirementsNotMet"})
            }
            CsvBehavior::Fail => json!({
                "phase": "Failed",
                "reason": "InstallCheckFailed",
                "message": "install timeout"
            }),
        };
        if let Some(obj) = self.objects.get_mut(key) {
            obj.data["status"] = status;
        }
    }

    fn is_csv(key: &ObjectKey) -> bool {
        key.plural == "clusterserviceversions"
    }
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn list(
        &self,
        ar: &ApiResource,
        scope: &Scope,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>, Error> {
        let mut state = self.state();
        if state.failing_reads {
            return Err(unavailable());
        }

        let expired: Vec<ObjectKey> = state
            .terminating
            .iter_mut()
            .filter(|(key, _)| key.is_resource(ar))
            .filter_map(|(key, remaining)| {
                if *remaining == 0 {
                    Some(key.clone())
                } else {
                    *remaining -= 1;
                    None
                }
            })
            .collect();
        for key in expired {
            state.terminating.remove(&key);
            state.objects.remove(&key);
        }

        let selector = params.label_selector.clone().unwrap_or_default();
        let keys: Vec<ObjectKey> = state
            .objects
            .iter()
            .filter(|(key, obj)| {
                key.is_resource(ar)
                    && key.in_scope(scope)
                    && selector_matches(&selector, obj.labels())
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys.iter().filter(|k| FakeState::is_csv(k)) {
            state.observe_csv(key);
        }
        Ok(keys
            .iter()
            .filter_map(|key| state.objects.get(key).cloned())
            .collect())
    }

    async fn get(
        &self,
        ar: &ApiResource,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        let mut state = self.state();
        if state.failing_reads {
            return Err(unavailable());
        }
        let key = ObjectKey::new(ar, scope, name);
        if FakeState::is_csv(&key) && state.objects.contains_key(&key) {
            state.observe_csv(&key);
        }
        Ok(state.objects.get(&key).cloned())
    }

    async fn create(
        &self,
        ar: &ApiResource,
        scope: &Scope,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let mut state = self.state();
        let name = obj.name_any();
        state.mutations.push(format!("create {} {}", ar.kind, name));

        if state.failing_creates.contains(&ar.kind) {
            return Err(api_error(
                403,
                "Forbidden",
                format!("{} {} is forbidden", ar.kind, name),
            ));
        }
        let key = ObjectKey::new(ar, scope, &name);
        if state.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} {:?} already exists", ar.plural, name),
            ));
        }

        let mut created = obj.clone();
        created.metadata.namespace = scope.namespace().map(str::to_string);
        created.metadata.uid = Some(format!("uid-{}", state.next_uid));
        created.metadata.resource_version = Some(state.next_uid.to_string());
        created.types = Some(kube::core::TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        });
        state.next_uid += 1;
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn delete(&self, ar: &ApiResource, scope: &Scope, name: &str) -> Result<bool, Error> {
        let mut state = self.state();
        state.mutations.push(format!("delete {} {}", ar.kind, name));

        if state.failing_deletes.contains(&ar.kind) {
            return Err(api_error(
                403,
                "Forbidden",
                format!("deleting {} {} is forbidden", ar.kind, name),
            ));
        }
        let key = ObjectKey::new(ar, scope, name);
        if !state.objects.contains_key(&key) {
            return Ok(false);
        }
        if state.terminating.contains_key(&key) {
            return Ok(true);
        }
        let lag = state.deletion_lag;
        if lag == 0 {
            state.objects.remove(&key);
        } else {
            state.terminating.insert(key, lag);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use olmrun_common::kube_utils::package_labels;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::exact("owner=operator-sdk,package-name=memcached-operator", true)]
    #[case::double_equals("owner==operator-sdk", true)]
    #[case::subset("package-name=memcached-operator", true)]
    #[case::empty("", true)]
    #[case::other_package("package-name=etcd-operator", false)]
    #[case::missing_key("app=memcached", false)]
    fn selector_matching(#[case] selector: &str, #[case] expected: bool) {
        assert_eq!(selector_matches(selector, &package_labels(MEMCACHED)), expected);
    }
}
