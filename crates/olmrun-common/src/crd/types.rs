//! Shared OLM value types

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Namespace scope an operator version may watch
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum InstallModeType {
    /// Watch only the namespace the operator is installed into
    OwnNamespace,
    /// Watch exactly one namespace
    SingleNamespace,
    /// Watch an explicit list of namespaces
    MultiNamespace,
    /// Watch every namespace in the cluster
    AllNamespaces,
}

impl InstallModeType {
    /// All install mode types, in OLM's canonical order
    pub const ALL: [InstallModeType; 4] = [
        InstallModeType::OwnNamespace,
        InstallModeType::SingleNamespace,
        InstallModeType::MultiNamespace,
        InstallModeType::AllNamespaces,
    ];

    /// The name OLM uses on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OwnNamespace => "OwnNamespace",
            Self::SingleNamespace => "SingleNamespace",
            Self::MultiNamespace => "MultiNamespace",
            Self::AllNamespaces => "AllNamespaces",
        }
    }
}

impl std::fmt::Display for InstallModeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstallModeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown install mode type {:?}, expected one of OwnNamespace, \
                     SingleNamespace, MultiNamespace, AllNamespaces",
                    s
                )
            })
    }
}

/// Whether a CSV supports a given install mode
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct InstallModeSupport {
    /// Install mode type
    #[serde(rename = "type")]
    pub mode_type: InstallModeType,

    /// Whether the CSV can be installed in this mode
    pub supported: bool,
}
