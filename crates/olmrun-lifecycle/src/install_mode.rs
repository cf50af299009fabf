//! Install mode: an install mode type plus its target namespaces
//!
//! Textual form is `Type[=ns1,ns2]`, e.g. `AllNamespaces`,
//! `OwnNamespace=default`, `MultiNamespace=ns1,ns2`.

use std::fmt;
use std::str::FromStr;

use kube::ResourceExt;

use olmrun_common::crd::{ClusterServiceVersion, InstallModeType};
use olmrun_common::{Error, Result};

/// Install mode type and target namespaces for an install
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallMode {
    /// Install mode type
    pub install_mode_type: InstallModeType,
    /// Namespaces the operator should watch
    pub target_namespaces: Vec<String>,
}

impl InstallMode {
    /// Cluster-wide install
    pub fn all_namespaces() -> Self {
        Self {
            install_mode_type: InstallModeType::AllNamespaces,
            target_namespaces: Vec::new(),
        }
    }

    /// Watch only the install namespace
    pub fn own_namespace(namespace: impl Into<String>) -> Self {
        Self {
            install_mode_type: InstallModeType::OwnNamespace,
            target_namespaces: vec![namespace.into()],
        }
    }

    /// Watch one other namespace
    pub fn single_namespace(namespace: impl Into<String>) -> Self {
        Self {
            install_mode_type: InstallModeType::SingleNamespace,
            target_namespaces: vec![namespace.into()],
        }
    }

    /// Watch a list of namespaces
    pub fn multi_namespace<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            install_mode_type: InstallModeType::MultiNamespace,
            target_namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    /// Check target-namespace cardinality against the install namespace
    pub fn validate(&self, install_namespace: &str) -> std::result::Result<(), String> {
        let targets = &self.target_namespaces;
        if targets.iter().any(|ns| ns.trim().is_empty()) {
            return Err("target namespaces must not be empty strings".to_string());
        }
        match self.install_mode_type {
            InstallModeType::AllNamespaces => Ok(()),
            InstallModeType::OwnNamespace => match targets.as_slice() {
                [ns] if ns == install_namespace => Ok(()),
                [ns] => Err(format!(
                    "target namespace {} must equal the install namespace {}",
                    ns, install_namespace
                )),
                _ => Err(format!(
                    "exactly one target namespace required, got {}",
                    targets.len()
                )),
            },
            InstallModeType::SingleNamespace => match targets.len() {
                1 => Ok(()),
                n => Err(format!("exactly one target namespace required, got {}", n)),
            },
            InstallModeType::MultiNamespace => {
                if targets.is_empty() {
                    return Err("at least one target namespace required".to_string());
                }
                for (i, ns) in targets.iter().enumerate() {
                    if targets[..i].contains(ns) {
                        return Err(format!("duplicate target namespace {}", ns));
                    }
                }
                Ok(())
            }
        }
    }

    /// Target namespaces the operator group should carry
    ///
    /// Empty for AllNamespaces, which OLM reads as cluster-wide.
    pub fn operator_group_targets(&self) -> Vec<String> {
        match self.install_mode_type {
            InstallModeType::AllNamespaces => Vec::new(),
            _ => self.target_namespaces.clone(),
        }
    }

    /// Resolve the mode to install `csv` with
    ///
    /// A requested mode must be supported by the CSV and well formed. With
    /// no request, AllNamespaces is used if supported, else OwnNamespace on
    /// the install namespace.
    pub fn resolve(
        requested: Option<&InstallMode>,
        csv: &ClusterServiceVersion,
        install_namespace: &str,
    ) -> Result<InstallMode> {
        let csv_name = csv.name_any();
        let mode = match requested {
            Some(mode) => mode.clone(),
            None if csv.supports(InstallModeType::AllNamespaces) => Self::all_namespaces(),
            None if csv.supports(InstallModeType::OwnNamespace) => {
                Self::own_namespace(install_namespace)
            }
            None => {
                return Err(Error::install_mode(
                    csv_name,
                    "<default>",
                    format!(
                        "neither AllNamespaces nor OwnNamespace is supported (supported: {:?})",
                        csv.supported_install_modes()
                    ),
                ))
            }
        };

        if !csv.supports(mode.install_mode_type) {
            return Err(Error::install_mode(
                csv_name,
                &mode,
                format!(
                    "not supported by the CSV (supported: {:?})",
                    csv.supported_install_modes()
                ),
            ));
        }
        mode.validate(install_namespace)
            .map_err(|msg| Error::install_mode(csv_name, &mode, msg))?;
        Ok(mode)
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.install_mode_type)?;
        if !self.target_namespaces.is_empty() {
            write!(f, "={}", self.target_namespaces.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for InstallMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (mode, targets) = match s.split_once('=') {
            Some((mode, targets)) => (mode, Some(targets)),
            None => (s, None),
        };
        let install_mode_type: InstallModeType = mode.parse()?;
        let target_namespaces = match targets {
            Some(targets) => targets.split(',').map(|ns| ns.trim().to_string()).collect(),
            None => Vec::new(),
        };
        if target_namespaces.iter().any(String::is_empty) {
            return Err(format!("empty target namespace in {:?}", s));
        }
        Ok(Self {
            install_mode_type,
            target_namespaces,
        })
    }
}
