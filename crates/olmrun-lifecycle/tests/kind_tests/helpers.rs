//! Test helpers for integration tests
//!
//! Provides a kind cluster with OLM, throwaway namespaces, and package
//! directories with a runnable operator.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Context};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Config};

use olmrun_common::telemetry::{init_logging, LoggingConfig};
use olmrun_lifecycle::{Configuration, KubeResourceClient, RunContext};

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "olmrun-integration-test";

/// Per-run timeout, matching what a user gets by default
pub const RUN_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_OLM_VERSION: &str = "v0.28.0";
const DEFAULT_OPERATOR_IMAGE: &str = "registry.k8s.io/pause:3.9";

/// Global lock to ensure the cluster is prepared only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

fn kind_cluster_exists(name: &str) -> anyhow::Result<bool> {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .context("failed to run kind")?;
    let clusters = String::from_utf8_lossy(&output.stdout);
    Ok(clusters.lines().any(|line| line.trim() == name))
}

fn run(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {program}"))?;
    if !output.status.success() {
        bail!(
            "{program} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

fn olm_installed() -> bool {
    run(
        "kubectl",
        &[
            "--context",
            &format!("kind-{TEST_CLUSTER_NAME}"),
            "get",
            "crd",
            "clusterserviceversions.operators.coreos.com",
        ],
    )
    .is_ok()
}

/// Create the kind cluster and install OLM into it, reusing both if present
fn prepare_cluster() -> anyhow::Result<()> {
    if !kind_cluster_exists(TEST_CLUSTER_NAME)? {
        println!("Creating kind cluster '{TEST_CLUSTER_NAME}'...");
        run(
            "kind",
            &["create", "cluster", "--name", TEST_CLUSTER_NAME, "--wait", "60s"],
        )?;
    }

    if olm_installed() {
        return Ok(());
    }
    let version =
        std::env::var("OLMRUN_TEST_OLM_VERSION").unwrap_or_else(|_| DEFAULT_OLM_VERSION.into());
    let base = format!(
        "https://github.com/operator-framework/operator-lifecycle-manager/releases/download/{version}"
    );
    let context = format!("kind-{TEST_CLUSTER_NAME}");
    println!("Installing OLM {version}...");
    run(
        "kubectl",
        &[
            "--context",
            &context,
            "create",
            "-f",
            &format!("{base}/crds.yaml"),
        ],
    )?;
    run(
        "kubectl",
        &[
            "--context",
            &context,
            "wait",
            "--for=condition=Established",
            "crd/clusterserviceversions.operators.coreos.com",
            "--timeout=60s",
        ],
    )?;
    run(
        "kubectl",
        &["--context", &context, "create", "-f", &format!("{base}/olm.yaml")],
    )?;
    for deployment in ["olm-operator", "catalog-operator"] {
        run(
            "kubectl",
            &[
                "--context",
                &context,
                "-n",
                "olm",
                "rollout",
                "status",
                &format!("deployment/{deployment}"),
                "--timeout=120s",
            ],
        )?;
    }
    Ok(())
}

async fn create_test_client() -> anyhow::Result<Client> {
    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(format!("kind-{TEST_CLUSTER_NAME}")),
        ..Default::default()
    })
    .await
    .context("failed to load kubeconfig")?;
    Client::try_from(config).context("failed to create client")
}

/// Ensure the test cluster is ready and return a fresh client
pub async fn ensure_test_cluster() -> anyhow::Result<Client> {
    // Only the first test in the process installs the subscriber.
    let _ = init_logging(LoggingConfig::default());

    let prepared = CLUSTER_INIT.get_or_init(|| prepare_cluster().map_err(|e| format!("{e:#}")));
    if let Err(e) = prepared {
        bail!("test cluster unavailable: {e}");
    }
    create_test_client().await
}

/// Recreate `name` as an empty namespace
pub async fn fresh_namespace(client: &Client, name: &str) -> anyhow::Result<()> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    if namespaces.get_opt(name).await?.is_some() {
        namespaces.delete(name, &DeleteParams::default()).await?;
        for _ in 0..120 {
            if namespaces.get_opt(name).await?.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    namespaces.create(&PostParams::default(), &namespace).await?;
    Ok(())
}

/// Lifecycle configuration bound to `namespace` on the test cluster
pub fn configuration(client: Client, namespace: &str) -> Configuration {
    Configuration::with_client(Arc::new(KubeResourceClient::new(client)), namespace)
}

/// Context bounded by the default run timeout
pub fn run_context() -> RunContext {
    RunContext::with_timeout(RUN_TIMEOUT)
}

/// Whether a cluster-scoped CRD exists
pub async fn crd_exists(client: &Client, name: &str) -> anyhow::Result<bool> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    Ok(crds.get_opt(name).await?.is_some())
}

// =============================================================================
// Package fixtures
// =============================================================================

/// A release of a test operator whose deployment runs a placeholder image
pub struct Release<'a> {
    /// Package name, also the CRD group prefix
    pub package: &'a str,
    /// Semantic version
    pub version: &'a str,
    /// Version this release replaces
    pub replaces: Option<&'a str>,
    /// Supported install modes
    pub install_modes: &'a [&'a str],
}

impl Release<'_> {
    fn csv_name(&self) -> String {
        format!("{}.v{}", self.package, self.version)
    }

    fn group(&self) -> String {
        format!("{}.olmrun.test", self.package.replace('-', ""))
    }

    /// CRD owned by every release of the package
    pub fn crd_name(&self) -> String {
        format!("widgets.{}", self.group())
    }

    fn csv_yaml(&self, image: &str) -> String {
        let modes: String = ["OwnNamespace", "SingleNamespace", "MultiNamespace", "AllNamespaces"]
            .iter()
            .map(|mode| {
                format!(
                    "  - type: {mode}\n    supported: {}\n",
                    self.install_modes.contains(mode)
                )
            })
            .collect();
        let replaces = self
            .replaces
            .map(|v| format!("  replaces: {}.v{v}\n", self.package))
            .unwrap_or_default();
        format!(
            r#"apiVersion: operators.coreos.com/v1alpha1
kind: ClusterServiceVersion
metadata:
  name: {csv}
  annotations:
    capabilities: Basic Install
spec:
  displayName: {package}
  version: {version}
{replaces}  installModes:
{modes}  customresourcedefinitions:
    owned:
    - name: {crd}
      version: v1
      kind: Widget
      displayName: Widget
  install:
    strategy: deployment
    spec:
      deployments:
      - name: {package}
        spec:
          replicas: 1
          selector:
            matchLabels:
              app: {package}
          template:
            metadata:
              labels:
                app: {package}
            spec:
              containers:
              - name: manager
                image: {image}
"#,
            csv = self.csv_name(),
            package = self.package,
            version = self.version,
            crd = self.crd_name(),
        )
    }

    fn crd_yaml(&self) -> String {
        format!(
            r#"apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: {name}
spec:
  group: {group}
  names:
    kind: Widget
    listKind: WidgetList
    plural: widgets
    singular: widget
  scope: Namespaced
  versions:
  - name: v1
    served: true
    storage: true
    schema:
      openAPIV3Schema:
        type: object
        x-kubernetes-preserve-unknown-fields: true
"#,
            name = self.crd_name(),
            group = self.group(),
        )
    }
}

/// Write a packagemanifests directory for `releases` under `root`
///
/// Every release goes in the `alpha` channel, headed by the last release.
pub fn write_package(root: &Path, releases: &[Release<'_>]) -> anyhow::Result<PathBuf> {
    let Some(head) = releases.last() else {
        bail!("a package needs at least one release");
    };
    let image = std::env::var("OLMRUN_TEST_OPERATOR_IMAGE")
        .unwrap_or_else(|_| DEFAULT_OPERATOR_IMAGE.into());
    let dir = root.join(head.package);
    for release in releases {
        let version_dir = dir.join(release.version);
        std::fs::create_dir_all(&version_dir)?;
        std::fs::write(
            version_dir.join(format!("{}.clusterserviceversion.yaml", release.csv_name())),
            release.csv_yaml(&image),
        )?;
        std::fs::write(
            version_dir.join(format!("{}.crd.yaml", release.crd_name())),
            release.crd_yaml(),
        )?;
    }
    std::fs::write(
        dir.join(format!("{}.package.yaml", head.package)),
        format!(
            "packageName: {}\nchannels:\n- name: alpha\n  currentCSV: {}\ndefaultChannel: alpha\n",
            head.package,
            head.csv_name()
        ),
    )?;
    Ok(dir)
}
