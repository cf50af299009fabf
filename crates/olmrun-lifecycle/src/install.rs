//! Install orchestrator
//!
//! Installs one release of a packagemanifests-format operator:
//!
//! 1. validate the package, version, channel, install mode and namespace
//!    state, and refuse if the package already has an installation record;
//! 2. create the record, missing CRDs, an operator group when the namespace
//!    has none, a configmap catalog source, the CSV and a subscription;
//! 3. wait until the CSV reports `Succeeded` and the record is readable.
//!
//! Creation is not transactional. A failure part way leaves what was
//! already created in place, and `Uninstall` removes it.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

use olmrun_common::crd::{
    CatalogSource, CatalogSourceSpec, ClusterServiceVersion, CsvPhase, InstallPlanApproval,
    OperatorGroup, OperatorGroupSpec, Subscription, SubscriptionSpec,
    CATALOG_SOURCE_TYPE_CONFIGMAP,
};
use olmrun_common::kube_utils::{
    api_resource, build_api_resource, is_conflict, package_labels, strip_server_metadata,
    to_dynamic, typed_to_dynamic, validate_label_value,
};
use olmrun_common::{
    Error, Result, OWNER_LABEL_VALUE, SDK_OPERATOR_GROUP_NAME, TARGET_NAMESPACES_ANNOTATION,
};

use crate::client::{get_typed, list_typed, Scope};
use crate::config::Configuration;
use crate::context::RunContext;
use crate::install_mode::InstallMode;
use crate::manifests::{load_package, PackageBundle, ServiceVersion};
use crate::pipeline::{Operation, Pipeline};
use crate::registry::{build_record, catalog_source_name, list_record, package_config_map_name};
use crate::watch::DEFAULT_POLL_INTERVAL;

const CRD_API_VERSION: &str = "apiextensions.k8s.io/v1";
const CRD_KIND: &str = "CustomResourceDefinition";
const CRD_PLURAL: &str = "customresourcedefinitions";

/// What to install
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallOptions {
    /// Directory in the packagemanifests layout
    pub package_directory: PathBuf,
    /// Release to install (`0.0.2`, `v0.0.2` or the CSV name)
    pub version: String,
    /// Install mode; chosen from the CSV's supported modes when unset
    pub install_mode: Option<InstallMode>,
    /// Channel to subscribe to; chosen from the package index when unset
    pub channel: Option<String>,
}

impl InstallOptions {
    /// Install `version` from `package_directory` with default mode and channel
    pub fn new(package_directory: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            package_directory: package_directory.into(),
            version: version.into(),
            install_mode: None,
            channel: None,
        }
    }
}

/// Installs a package release
pub struct Install<'a> {
    config: &'a Configuration,
    options: InstallOptions,
    poll_interval: Duration,
}

impl<'a> Install<'a> {
    /// Create an install for `options` against `config`
    pub fn new(config: &'a Configuration, options: InstallOptions) -> Self {
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

    /// Run the install, returning the CSV once it has succeeded
    pub async fn run(&self, ctx: &RunContext) -> Result<ClusterServiceVersion> {
        Pipeline::new(self.poll_interval).drive(self, ctx).await
    }

    fn scope(&self) -> Scope {
        Scope::namespaced(self.config.namespace())
    }

    async fn create(&self, ctx: &RunContext, object: &PlannedObject) -> Result<()> {
        let client = self.config.client();
        let kind = object.ar.kind.as_str();
        let name = object.object.name_any();
        let description = format!("create {} {}", kind, name);

        if object.if_absent {
            let existing = ctx
                .run(&description, async {
                    client
                        .get(&object.ar, &object.scope, &name)
                        .await
                        .map_err(|e| Error::read(kind, e))
                })
                .await?;
            if existing.is_some() {
                debug!(kind, name = %name, "already present, not creating");
                return Ok(());
            }
        }

        ctx.run(&description, async {
            client
                .create(&object.ar, &object.scope, &object.object)
                .await
                .map_err(|e| match &e {
                    Error::Kube { source } if is_conflict(source) => Error::mutation(
                        "create",
                        kind,
                        &name,
                        format!("{} (left over from an earlier install, run uninstall first)", e),
                    ),
                    _ => Error::mutation("create", kind, &name, e),
                })
        })
        .await?;
        info!(kind, name = %name, scope = %object.scope, "created");
        Ok(())
    }
}

/// An object install will create
#[derive(Clone, Debug)]
struct PlannedObject {
    ar: ApiResource,
    scope: Scope,
    object: DynamicObject,
    if_absent: bool,
}

/// Result of validating an install: the objects to create, in order
#[derive(Clone, Debug)]
pub struct InstallTarget {
    package: String,
    csv_name: String,
    channel: String,
    install_mode: InstallMode,
    objects: Vec<PlannedObject>,
}

impl InstallTarget {
    /// Package being installed
    pub fn package(&self) -> &str {
        &self.package
    }

    /// CSV being installed
    pub fn csv_name(&self) -> &str {
        &self.csv_name
    }

    /// Channel the subscription follows
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Resolved install mode
    pub fn install_mode(&self) -> &InstallMode {
        &self.install_mode
    }

    /// Kind and name of every object to create, in creation order
    pub fn planned_objects(&self) -> Vec<(String, String)> {
        self.objects
            .iter()
            .map(|o| (o.ar.kind.clone(), o.object.name_any()))
            .collect()
    }
}

#[async_trait]
impl Operation for Install<'_> {
    type Plan = InstallTarget;
    type Output = ClusterServiceVersion;

    fn name(&self) -> &str {
        "install"
    }

    async fn validate(&self, ctx: &RunContext) -> Result<InstallTarget> {
        self.config.validate()?;
        let namespace = self.config.namespace();
        let client = self.config.client();

        let bundle = load_package(&self.options.package_directory)?;
        let package = bundle.package_name().to_string();
        validate_label_value(&package)
            .map_err(|e| Error::precondition(&package, format!("package name {}", e)))?;

        let record = ctx
            .run("read installation record", list_record(client, namespace, &package))
            .await?;
        if !record.is_empty() {
            return Err(Error::already_installed(package));
        }

        let target = bundle.find_version(&self.options.version).ok_or_else(|| {
            Error::precondition(
                &package,
                format!(
                    "version {} not found in {}",
                    self.options.version,
                    bundle.directory.display()
                ),
            )
        })?;
        check_lineage(&bundle, target)?;
        let channel = select_channel(&bundle, &target.name, self.options.channel.as_deref())?;
        let install_mode =
            InstallMode::resolve(self.options.install_mode.as_ref(), &target.csv, namespace)?;

        let groups: Vec<OperatorGroup> = ctx
            .run("list OperatorGroups", async {
                list_typed(client, &self.scope(), &ListParams::default())
                    .await
                    .map_err(|e| Error::read("OperatorGroup", e))
            })
            .await?;
        let create_group = plan_operator_group(&package, &groups, &install_mode)?;

        let objects = self.plan_objects(&bundle, target, &channel, &install_mode, create_group)?;
        info!(
            package = %package,
            csv = %target.name,
            channel = %channel,
            install_mode = %install_mode,
            namespace = %namespace,
            objects = objects.len(),
            "install validated"
        );

        Ok(InstallTarget {
            package,
            csv_name: target.name.clone(),
            channel,
            install_mode,
            objects,
        })
    }

    async fn mutate(&self, ctx: &RunContext, plan: &InstallTarget) -> Result<()> {
        for object in &plan.objects {
            self.create(ctx, object).await?;
        }
        Ok(())
    }

    fn convergence(&self, plan: &InstallTarget) -> String {
        format!("ClusterServiceVersion {} to succeed", plan.csv_name)
    }

    async fn converged(&self, _ctx: &RunContext, plan: &InstallTarget) -> Result<bool> {
        let client = self.config.client();
        let csv: Option<ClusterServiceVersion> =
            get_typed(client, &self.scope(), &plan.csv_name)
                .await
                .map_err(|e| Error::read("ClusterServiceVersion", e))?;
        let Some(csv) = csv else {
            return Ok(false);
        };

        match csv.phase() {
            Some(CsvPhase::Succeeded) => {}
            Some(CsvPhase::Failed) => {
                let status = csv.status.unwrap_or_default();
                return Err(Error::csv_failed(
                    &plan.csv_name,
                    status.reason.unwrap_or_default(),
                    status.message.unwrap_or_default(),
                ));
            }
            phase => {
                debug!(csv = %plan.csv_name, phase = ?phase, "waiting for ClusterServiceVersion");
                return Ok(false);
            }
        }

        let record = list_record(client, self.config.namespace(), &plan.package).await?;
        Ok(!record.is_empty())
    }

    async fn finish(&self, ctx: &RunContext, plan: InstallTarget) -> Result<ClusterServiceVersion> {
        let client = self.config.client();
        let csv: Option<ClusterServiceVersion> = ctx
            .run("read ClusterServiceVersion", async {
                get_typed(client, &self.scope(), &plan.csv_name)
                    .await
                    .map_err(|e| Error::read("ClusterServiceVersion", e))
            })
            .await?;
        let csv = csv.ok_or_else(|| {
            Error::internal_with_context(
                "install",
                format!("ClusterServiceVersion {} disappeared after succeeding", plan.csv_name),
            )
        })?;

        info!(
            package = %plan.package,
            csv = %plan.csv_name,
            channel = %plan.channel,
            install_mode = %plan.install_mode,
            "operator installed"
        );
        Ok(csv)
    }
}

impl Install<'_> {
    fn plan_objects(
        &self,
        bundle: &PackageBundle,
        target: &ServiceVersion,
        channel: &str,
        install_mode: &InstallMode,
        create_group: bool,
    ) -> Result<Vec<PlannedObject>> {
        let package = bundle.package_name();
        let namespace = self.config.namespace();
        let scope = self.scope();
        let mut objects = Vec::new();

        for map in build_record(bundle, namespace)? {
            objects.push(PlannedObject {
                ar: api_resource::<ConfigMap>(),
                scope: scope.clone(),
                object: typed_to_dynamic(&map)?,
                if_absent: false,
            });
        }

        for crd in &target.crds {
            let api_version = crd
                .get("apiVersion")
                .and_then(Value::as_str)
                .unwrap_or(CRD_API_VERSION);
            let mut object = to_dynamic(crd.clone())?;
            prepare_metadata(&mut object, package, None);
            objects.push(PlannedObject {
                ar: build_api_resource(api_version, CRD_KIND, CRD_PLURAL),
                scope: Scope::Cluster,
                object,
                if_absent: true,
            });
        }

        if create_group {
            let mut group = OperatorGroup::new(
                SDK_OPERATOR_GROUP_NAME,
                OperatorGroupSpec {
                    target_namespaces: install_mode.operator_group_targets(),
                },
            );
            group.metadata.namespace = Some(namespace.to_string());
            group.metadata.labels = Some(package_labels(package));
            objects.push(PlannedObject {
                ar: api_resource::<OperatorGroup>(),
                scope: scope.clone(),
                object: typed_to_dynamic(&group)?,
                if_absent: false,
            });
        }

        let catalog_name = catalog_source_name(package);
        let mut catalog = CatalogSource::new(
            &catalog_name,
            CatalogSourceSpec {
                source_type: CATALOG_SOURCE_TYPE_CONFIGMAP.to_string(),
                config_map: Some(package_config_map_name(package)),
                display_name: Some(
                    target
                        .csv
                        .spec
                        .display_name
                        .clone()
                        .unwrap_or_else(|| package.to_string()),
                ),
                publisher: Some(OWNER_LABEL_VALUE.to_string()),
                ..Default::default()
            },
        );
        catalog.metadata.namespace = Some(namespace.to_string());
        catalog.metadata.labels = Some(package_labels(package));
        objects.push(PlannedObject {
            ar: api_resource::<CatalogSource>(),
            scope: scope.clone(),
            object: typed_to_dynamic(&catalog)?,
            if_absent: false,
        });

        let mut csv = to_dynamic(target.raw_csv.clone())?;
        prepare_metadata(&mut csv, package, Some(namespace));
        csv.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                TARGET_NAMESPACES_ANNOTATION.to_string(),
                install_mode.operator_group_targets().join(","),
            );
        objects.push(PlannedObject {
            ar: api_resource::<ClusterServiceVersion>(),
            scope: scope.clone(),
            object: csv,
            if_absent: false,
        });

        let mut subscription = Subscription::new(
            package,
            SubscriptionSpec {
                name: package.to_string(),
                channel: Some(channel.to_string()),
                source: catalog_name,
                source_namespace: namespace.to_string(),
                starting_csv: Some(target.name.clone()),
                install_plan_approval: Some(InstallPlanApproval::Automatic),
            },
        );
        subscription.metadata.namespace = Some(namespace.to_string());
        subscription.metadata.labels = Some(package_labels(package));
        objects.push(PlannedObject {
            ar: api_resource::<Subscription>(),
            scope,
            object: typed_to_dynamic(&subscription)?,
            if_absent: false,
        });

        Ok(objects)
    }
}

/// Stamp ownership labels and drop server-owned fields from a manifest
fn prepare_metadata(object: &mut DynamicObject, package: &str, namespace: Option<&str>) {
    strip_server_metadata(&mut object.metadata);
    object.metadata.namespace = namespace.map(str::to_string);
    object
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(package_labels(package));
    if let Some(data) = object.data.as_object_mut() {
        data.remove("status");
    }
}

/// The requested release's `replaces` must resolve inside a multi-version package
fn check_lineage(bundle: &PackageBundle, target: &ServiceVersion) -> Result<()> {
    let package = bundle.package_name();
    if let Some(replaces) = target.replaces() {
        if bundle.versions.len() > 1 && bundle.find_csv(replaces).is_none() {
            return Err(Error::precondition(
                package,
                format!(
                    "{} replaces {} which is not in the package directory",
                    target.name, replaces
                ),
            ));
        }
    }
    bundle.lineage(&target.name)?;
    Ok(())
}

/// Pick the channel the subscription follows
///
/// An explicit channel must lead to the CSV. Otherwise a channel whose head
/// is the CSV wins, then one whose lineage contains it, preferring the
/// package's default channel in both cases.
fn select_channel(bundle: &PackageBundle, csv_name: &str, requested: Option<&str>) -> Result<String> {
    let package = bundle.package_name();
    let manifest = &bundle.manifest;

    if let Some(name) = requested {
        let channel = manifest.channel(name).ok_or_else(|| {
            Error::precondition(package, format!("channel {} is not declared", name))
        })?;
        if !channel_reaches(bundle, &channel.current_csv, csv_name)? {
            return Err(Error::precondition(
                package,
                format!("channel {} does not lead to {}", name, csv_name),
            ));
        }
        return Ok(name.to_string());
    }

    let default = manifest.default_channel_name();
    let mut heads = Vec::new();
    let mut lineages = Vec::new();
    for channel in &manifest.channels {
        if channel.current_csv == csv_name {
            heads.push(channel.name.as_str());
        } else if channel_reaches(bundle, &channel.current_csv, csv_name)? {
            lineages.push(channel.name.as_str());
        }
    }

    for candidates in [heads, lineages] {
        if let Some(name) = candidates
            .iter()
            .find(|c| Some(**c) == default)
            .or_else(|| candidates.first())
        {
            return Ok(name.to_string());
        }
    }
    Err(Error::precondition(
        package,
        format!("no channel leads to {}", csv_name),
    ))
}

fn channel_reaches(bundle: &PackageBundle, head: &str, csv_name: &str) -> Result<bool> {
    Ok(bundle.lineage(head)?.iter().any(|v| v.name == csv_name))
}

/// Decide whether install must create an operator group
///
/// OLM allows one group per namespace, so an existing group is reused when
/// it already targets what the install mode needs and is an error otherwise.
fn plan_operator_group(
    package: &str,
    groups: &[OperatorGroup],
    install_mode: &InstallMode,
) -> Result<bool> {
    let targets = install_mode.operator_group_targets();
    match groups {
        [] => Ok(true),
        [group] if group.targets(&targets) => {
            debug!(operator_group = %group.name_any(), "reusing existing OperatorGroup");
            Ok(false)
        }
        [group] => Err(Error::precondition(
            package,
            format!(
                "OperatorGroup {} targets {:?} but install mode {} needs {:?}",
                group.name_any(),
                group.spec.target_namespaces,
                install_mode,
                targets
            ),
        )),
        many => Err(Error::precondition(
            package,
            format!(
                "namespace has {} OperatorGroups, OLM requires at most one",
                many.len()
            ),
        )),
    }
}
