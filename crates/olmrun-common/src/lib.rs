//! Common types for olmrun: OLM resources, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key identifying the tool that owns a resource
pub const OWNER_LABEL_KEY: &str = "owner";

/// Owner label value stamped on every object an install creates
pub const OWNER_LABEL_VALUE: &str = "operator-sdk";

/// Label key carrying the package name of an installed operator
pub const PACKAGE_NAME_LABEL_KEY: &str = "package-name";

/// Label key carrying the operator version of a registry bundle config map
pub const OPERATOR_VERSION_LABEL_KEY: &str = "operator-version";

/// Name of the OperatorGroup created when a namespace has none
pub const SDK_OPERATOR_GROUP_NAME: &str = "operator-sdk-og";

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "olmrun";

/// Namespace used when neither options nor kubeconfig name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Annotation OLM reads to learn an operator's target namespaces
pub const TARGET_NAMESPACES_ANNOTATION: &str = "olm.targetNamespaces";
