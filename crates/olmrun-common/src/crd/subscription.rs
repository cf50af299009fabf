//! Subscription: binds a namespace to a package channel in a catalog

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Subscription spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    namespaced,
    status = "SubscriptionStatus",
    shortname = "sub"
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Package name
    pub name: String,

    /// Channel to follow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// CatalogSource that serves the package
    pub source: String,

    /// Namespace of the CatalogSource
    pub source_namespace: String,

    /// CSV to start the channel at
    #[serde(
        rename = "startingCSV",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub starting_csv: Option<String>,

    /// Install plan approval strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<InstallPlanApproval>,
}

/// How OLM approves install plans for a subscription
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum InstallPlanApproval {
    /// Install plans are approved without user action
    #[default]
    Automatic,
    /// Install plans wait for a user to approve them
    Manual,
}

/// Subscription status as reported by OLM
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// CSV OLM has installed for this subscription
    #[serde(
        rename = "installedCSV",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub installed_csv: Option<String>,

    /// CSV the subscription currently points at
    #[serde(rename = "currentCSV", default, skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,

    /// Subscription state (e.g. AtLatestKnown, UpgradePending)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Subscription {
    /// CSV names the subscription references, installed first
    pub fn referenced_csvs(&self) -> Vec<&str> {
        let status = self.status.as_ref();
        let candidates = [
            status.and_then(|s| s.installed_csv.as_deref()),
            status.and_then(|s| s.current_csv.as_deref()),
            self.spec.starting_csv.as_deref(),
        ];
        let mut csvs: Vec<&str> = Vec::new();
        for csv in candidates.into_iter().flatten() {
            if !csvs.contains(&csv) {
                csvs.push(csv);
            }
        }
        csvs
    }
}
