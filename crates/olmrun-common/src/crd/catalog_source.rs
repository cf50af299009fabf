//! CatalogSource: a package index OLM resolves subscriptions against

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Source type for catalogs backed by a registry config map
pub const CATALOG_SOURCE_TYPE_CONFIGMAP: &str = "configmap";

/// CatalogSource spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "CatalogSource",
    namespaced,
    shortname = "catsrc"
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceSpec {
    /// Catalog backend (`configmap`, `grpc`, `internal`)
    pub source_type: String,

    /// Config map holding the package index, for `configmap` sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,

    /// Registry address, for `grpc` sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Human readable catalog name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Catalog publisher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}
