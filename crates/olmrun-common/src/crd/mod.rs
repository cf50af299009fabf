//! Typed Operator Lifecycle Manager resources
//!
//! These are the OLM objects olmrun reads and writes. OLM owns their CRDs;
//! the types only model the fields olmrun needs and ignore the rest, so
//! CSVs are always created from the raw manifest rather than re-serialized
//! from these structs.

mod catalog_source;
mod cluster_service_version;
mod operator_group;
mod subscription;
mod types;

pub use catalog_source::{CatalogSource, CatalogSourceSpec, CATALOG_SOURCE_TYPE_CONFIGMAP};
pub use cluster_service_version::{
    ClusterServiceVersion, ClusterServiceVersionSpec, ClusterServiceVersionStatus,
    CrdDescription, CsvPhase, CustomResourceDefinitions,
};
pub use operator_group::{OperatorGroup, OperatorGroupSpec, OperatorGroupStatus};
pub use subscription::{InstallPlanApproval, Subscription, SubscriptionSpec, SubscriptionStatus};
pub use types::{InstallModeSupport, InstallModeType};
