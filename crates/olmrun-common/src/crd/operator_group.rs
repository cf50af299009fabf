//! OperatorGroup: selects the namespaces operators in a namespace watch

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// OperatorGroup spec
///
/// An empty `target_namespaces` means the group targets every namespace.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    namespaced,
    status = "OperatorGroupStatus",
    shortname = "og"
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    /// Namespaces the group's operators watch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,
}

/// OperatorGroup status as reported by OLM
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupStatus {
    /// Resolved target namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

impl OperatorGroup {
    /// Whether the group targets the given namespaces, ignoring order
    pub fn targets(&self, namespaces: &[String]) -> bool {
        let mut have = self.spec.target_namespaces.clone();
        let mut want = namespaces.to_vec();
        have.sort();
        have.dedup();
        want.sort();
        want.dedup();
        have == want
    }
}
