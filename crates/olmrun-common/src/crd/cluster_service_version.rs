//! ClusterServiceVersion: one immutable release of an operator
//!
//! Example:
//! ```yaml
//! apiVersion: operators.coreos.com/v1alpha1
//! kind: ClusterServiceVersion
//! metadata:
//!   name: memcached-operator.v0.0.3
//! spec:
//!   version: 0.0.3
//!   replaces: memcached-operator.v0.0.2
//!   installModes:
//!     - type: AllNamespaces
//!       supported: true
//!   customresourcedefinitions:
//!     owned:
//!       - name: memcacheds.cache.example.com
//!         version: v1alpha2
//!         kind: Memcached
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{InstallModeSupport, InstallModeType};

/// The subset of a CSV spec olmrun reads
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    namespaced,
    status = "ClusterServiceVersionStatus",
    shortname = "csv"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    /// Human readable operator name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Semantic version of this release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Name of the CSV this release upgrades from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,

    /// Install modes and whether each is supported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_modes: Vec<InstallModeSupport>,

    /// CRDs this release owns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customresourcedefinitions: Option<CustomResourceDefinitions>,
}

/// CRDs owned by a CSV
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CustomResourceDefinitions {
    /// CRDs shipped and managed by this operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owned: Vec<CrdDescription>,
}

/// Reference to one CRD version
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrdDescription {
    /// Full CRD name (`<plural>.<group>`)
    pub name: String,

    /// Served version the operator uses
    #[serde(default)]
    pub version: String,

    /// Kind of the custom resource
    #[serde(default)]
    pub kind: String,

    /// Human readable kind name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// CSV status as reported by OLM
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionStatus {
    /// Current install phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<CsvPhase>,

    /// Machine-readable reason for the phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// CSV install phase
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum CsvPhase {
    /// Requirements not yet met
    Pending,
    /// Requirements met, install about to start
    InstallReady,
    /// Install strategy being applied
    Installing,
    /// Operator deployment is available
    Succeeded,
    /// Install failed; see reason and message
    Failed,
    /// Being replaced by a newer CSV
    Replacing,
    /// Being deleted
    Deleting,
    /// Phase OLM reported that olmrun does not model
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for CsvPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::InstallReady => "InstallReady",
            Self::Installing => "Installing",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Replacing => "Replacing",
            Self::Deleting => "Deleting",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl ClusterServiceVersion {
    /// Whether the CSV declares `mode` as supported
    pub fn supports(&self, mode: InstallModeType) -> bool {
        self.spec
            .install_modes
            .iter()
            .any(|m| m.mode_type == mode && m.supported)
    }

    /// Install mode types the CSV supports, in declaration order
    pub fn supported_install_modes(&self) -> Vec<InstallModeType> {
        self.spec
            .install_modes
            .iter()
            .filter(|m| m.supported)
            .map(|m| m.mode_type)
            .collect()
    }

    /// Names of the CRDs this CSV owns
    pub fn owned_crd_names(&self) -> Vec<&str> {
        self.spec
            .customresourcedefinitions
            .as_ref()
            .map(|crds| crds.owned.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Name of the CSV this one replaces, if any
    pub fn replaces(&self) -> Option<&str> {
        self.spec.replaces.as_deref().filter(|r| !r.is_empty())
    }

    /// Current phase, if OLM has reported one
    pub fn phase(&self) -> Option<CsvPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}
