//! Uninstall orchestrator
//!
//! Removes everything an install created for a package, located through
//! ownership labels, subscription status and the installation record, so
//! partial installs are cleaned up too. Deletion order is subscriptions,
//! CSVs, CRDs (opt-in), catalog sources, named operator groups (opt-in),
//! then the record. Uninstall finishes once the record has disappeared.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::ListParams;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use olmrun_common::crd::{CatalogSource, ClusterServiceVersion, OperatorGroup, Subscription};
use olmrun_common::kube_utils::{
    api_resource, package_labels, package_selector, validate_label_value,
};
use olmrun_common::{Error, Result};

use crate::client::{list_typed, Scope};
use crate::config::Configuration;
use crate::context::RunContext;
use crate::pipeline::{Operation, Pipeline};
use crate::registry::{catalog_source_name, list_record, recorded_objects};
use crate::watch::DEFAULT_POLL_INTERVAL;

/// What to remove
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UninstallOptions {
    /// Package name as declared in its package manifest
    pub package: String,
    /// Also delete the CRDs the operator owns
    pub delete_crds: bool,
    /// Delete CRDs and the named operator groups
    pub delete_all: bool,
    /// Delete the operator groups in `operator_group_names`
    pub delete_operator_groups: bool,
    /// Operator groups to delete when requested
    pub operator_group_names: Vec<String>,
}

impl UninstallOptions {
    /// Remove `package`, keeping CRDs and operator groups
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            ..Default::default()
        }
    }

    fn deletes_crds(&self) -> bool {
        self.delete_crds || self.delete_all
    }

    fn deletes_operator_groups(&self) -> bool {
        self.delete_operator_groups || self.delete_all
    }
}

/// Uninstalls a package
pub struct Uninstall<'a> {
    config: &'a Configuration,
    options: UninstallOptions,
    poll_interval: Duration,
}

/// An object uninstall will delete
#[derive(Clone, Debug)]
struct PlannedDeletion {
    ar: ApiResource,
    scope: Scope,
    name: String,
}

/// Result of validating an uninstall: what to delete, in order
#[derive(Clone, Debug)]
pub struct UninstallTarget {
    package: String,
    installed: bool,
    deletions: Vec<PlannedDeletion>,
}

impl UninstallTarget {
    /// Whether an installation record was found
    pub fn installed(&self) -> bool {
        self.installed
    }

    /// Kind and name of every object to delete, in deletion order
    pub fn planned_deletions(&self) -> Vec<(String, String)> {
        self.deletions
            .iter()
            .map(|d| (d.ar.kind.clone(), d.name.clone()))
            .collect()
    }
}

impl<'a> Uninstall<'a> {
    /// Create an uninstall for `options` against `config`
    pub fn new(config: &'a Configuration, options: UninstallOptions) -> Self {
        Self {
            config,
            options,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the interval between convergence checks
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run the uninstall
    ///
    /// Returns `NotInstalled` when no installation record existed, after
    /// sweeping any labeled leftovers.
    pub async fn run(&self, ctx: &RunContext) -> Result<()> {
        Pipeline::new(self.poll_interval).drive(self, ctx).await
    }

    fn scope(&self) -> Scope {
        Scope::namespaced(self.config.namespace())
    }

    async fn list<K>(&self, ctx: &RunContext, scope: &Scope, params: &ListParams) -> Result<Vec<K>>
    where
        K: kube::Resource<DynamicType = ()> + serde::de::DeserializeOwned + Send,
    {
        let kind = K::kind(&()).to_string();
        let description = format!("list {}", kind);
        ctx.run(&description, async {
            list_typed(self.config.client(), scope, params)
                .await
                .map_err(|e| Error::read(&kind, e))
        })
        .await
    }
}

#[async_trait]
impl Operation for Uninstall<'_> {
    type Plan = UninstallTarget;
    type Output = ();

    fn name(&self) -> &str {
        "uninstall"
    }

    async fn validate(&self, ctx: &RunContext) -> Result<UninstallTarget> {
        let package = self.options.package.trim();
        if package.is_empty() {
            return Err(Error::precondition("", "package name must not be empty"));
        }
        validate_label_value(package)
            .map_err(|e| Error::precondition(package, format!("package name {}", e)))?;
        self.config.validate()?;
        let namespace = self.config.namespace();
        let scope = self.scope();
        let owned = ListParams::default().labels(&package_selector(package));
        let labels = package_labels(package);

        let record = ctx
            .run(
                "read installation record",
                list_record(self.config.client(), namespace, package),
            )
            .await?;
        let recorded = recorded_objects(&record);

        // Subscriptions lose labels when recreated by hand; match the package too.
        let subscriptions: Vec<Subscription> = self
            .list::<Subscription>(ctx, &scope, &ListParams::default())
            .await?
            .into_iter()
            .filter(|s| owns(s.labels(), &labels) || s.spec.name == package)
            .collect();

        let mut csv_names: BTreeSet<String> = recorded.csvs.clone();
        for sub in &subscriptions {
            csv_names.extend(sub.referenced_csvs().into_iter().map(str::to_string));
        }
        let csvs: Vec<ClusterServiceVersion> = self
            .list::<ClusterServiceVersion>(ctx, &scope, &ListParams::default())
            .await?
            .into_iter()
            .filter(|c| owns(c.labels(), &labels) || csv_names.contains(&c.name_any()))
            .collect();
        csv_names.extend(csvs.iter().map(|c| c.name_any()));

        let mut crd_names = BTreeSet::new();
        if self.options.deletes_crds() {
            crd_names.extend(recorded.crds.iter().cloned());
            for csv in &csvs {
                crd_names.extend(csv.owned_crd_names().into_iter().map(str::to_string));
            }
        }

        let mut catalog_names: BTreeSet<String> = self
            .list::<CatalogSource>(ctx, &scope, &owned)
            .await?
            .iter()
            .map(|c| c.name_any())
            .collect();
        if !record.is_empty() {
            catalog_names.insert(catalog_source_name(package));
        }

        let mut group_names = BTreeSet::new();
        if self.options.deletes_operator_groups() {
            group_names.extend(self.options.operator_group_names.iter().cloned());
        }

        let mut deletions = Vec::new();
        deletions.extend(planned(
            api_resource::<Subscription>(),
            &scope,
            subscriptions.iter().map(|s| s.name_any()),
        ));
        deletions.extend(planned(
            api_resource::<ClusterServiceVersion>(),
            &scope,
            csv_names,
        ));
        deletions.extend(planned(
            api_resource::<CustomResourceDefinition>(),
            &Scope::Cluster,
            crd_names,
        ));
        deletions.extend(planned(api_resource::<CatalogSource>(), &scope, catalog_names));
        deletions.extend(planned(api_resource::<OperatorGroup>(), &scope, group_names));
        deletions.extend(planned(
            api_resource::<ConfigMap>(),
            &scope,
            record.iter().map(|m| m.name_any()),
        ));

        let installed = !record.is_empty();
        if !installed {
            warn!(package, namespace, "no installation record found, sweeping leftovers");
        }
        info!(
            package,
            namespace,
            deletions = deletions.len(),
            delete_crds = self.options.deletes_crds(),
            "uninstall validated"
        );
        Ok(UninstallTarget {
            package: package.to_string(),
            installed,
            deletions,
        })
    }

    async fn mutate(&self, ctx: &RunContext, plan: &UninstallTarget) -> Result<()> {
        let client = self.config.client();
        for deletion in &plan.deletions {
            let kind = deletion.ar.kind.as_str();
            let name = deletion.name.as_str();
            let existed = ctx
                .run(&format!("delete {} {}", kind, name), async {
                    client
                        .delete(&deletion.ar, &deletion.scope, name)
                        .await
                        .map_err(|e| Error::mutation("delete", kind, name, e))
                })
                .await?;
            if existed {
                info!(kind, name, scope = %deletion.scope, "deleted");
            } else {
                debug!(kind, name, "already gone");
            }
        }
        Ok(())
    }

    fn convergence(&self, plan: &UninstallTarget) -> String {
        format!("installation record of {} to be removed", plan.package)
    }

    async fn converged(&self, _ctx: &RunContext, plan: &UninstallTarget) -> Result<bool> {
        let record = list_record(self.config.client(), self.config.namespace(), &plan.package)
            .await?;
        if !record.is_empty() {
            debug!(package = %plan.package, remaining = record.len(), "waiting for record deletion");
        }
        Ok(record.is_empty())
    }

    async fn finish(&self, _ctx: &RunContext, plan: UninstallTarget) -> Result<()> {
        if !plan.installed {
            return Err(Error::not_installed(plan.package));
        }
        info!(package = %plan.package, namespace = %self.config.namespace(), "operator uninstalled");
        Ok(())
    }
}

fn planned<'s>(
    ar: ApiResource,
    scope: &'s Scope,
    names: impl IntoIterator<Item = String> + 's,
) -> impl Iterator<Item = PlannedDeletion> + 's {
    names.into_iter().map(move |name| PlannedDeletion {
        ar: ar.clone(),
        scope: scope.clone(),
        name,
    })
}

/// Whether `labels` carries every label in `wanted`
fn owns(labels: &BTreeMap<String, String>, wanted: &BTreeMap<String, String>) -> bool {
    wanted.iter().all(|(k, v)| labels.get(k) == Some(v))
}
