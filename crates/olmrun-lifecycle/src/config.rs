//! Run configuration
//!
//! A `Configuration` bundles the resource client and the namespace an
//! install or uninstall operates in. It is built once per run and borrowed
//! by the orchestrators.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use olmrun_common::kube_utils::{client_from_config, load_config};
use olmrun_common::kube_utils::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use olmrun_common::{Error, Result, DEFAULT_NAMESPACE};

use crate::client::{KubeResourceClient, ResourceClient};

/// Environment variable naming the kubeconfig file(s)
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Environment variable overriding the namespace
pub const NAMESPACE_ENV: &str = "OLMRUN_NAMESPACE";

/// Inputs to `Configuration::load`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOptions {
    /// Kubeconfig file; inferred when unset
    pub kubeconfig_path: Option<PathBuf>,
    /// Namespace; taken from the kubeconfig context when unset
    pub namespace: Option<String>,
}

impl ConfigOptions {
    /// Read options from `KUBECONFIG` and `OLMRUN_NAMESPACE`
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var_os(KUBECONFIG_ENV),
            std::env::var(NAMESPACE_ENV).ok(),
        )
    }

    fn from_vars(kubeconfig: Option<std::ffi::OsString>, namespace: Option<String>) -> Self {
        // A KUBECONFIG list is left to kube's inference, which merges it.
        let kubeconfig_path = kubeconfig.and_then(|value| {
            let mut paths = std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty());
            match (paths.next(), paths.next()) {
                (Some(path), None) => Some(path),
                _ => None,
            }
        });
        Self {
            kubeconfig_path,
            namespace: namespace.filter(|ns| !ns.trim().is_empty()),
        }
    }
}

/// Connection and namespace for one run
#[derive(Clone)]
pub struct Configuration {
    namespace: String,
    client: Arc<dyn ResourceClient>,
}

impl Configuration {
    /// Load kubeconfig, resolve the namespace and build a client
    ///
    /// Namespace resolution order: `options.namespace`, the kubeconfig
    /// context namespace, then `default`.
    pub async fn load(options: ConfigOptions) -> Result<Self> {
        let config = load_config(options.kubeconfig_path.as_deref()).await?;
        let namespace = resolve_namespace(options.namespace, &config.default_namespace);
        let client = client_from_config(config, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)?;

        debug!(
            namespace = %namespace,
            kubeconfig = ?options.kubeconfig_path,
            "loaded configuration"
        );

        Ok(Self {
            namespace,
            client: Arc::new(KubeResourceClient::new(client)),
        })
    }

    /// Build a configuration around an existing client
    pub fn with_client(client: Arc<dyn ResourceClient>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            client,
        }
    }

    /// Namespace the run operates in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resource client for the run
    pub fn client(&self) -> &dyn ResourceClient {
        self.client.as_ref()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

fn resolve_namespace(explicit: Option<String>, context_namespace: &str) -> String {
    explicit
        .filter(|ns| !ns.trim().is_empty())
        .or_else(|| Some(context_namespace.to_string()).filter(|ns| !ns.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}
