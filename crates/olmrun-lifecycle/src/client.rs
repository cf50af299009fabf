//! Generic resource client
//!
//! Every cluster interaction of an install or uninstall goes through the
//! `ResourceClient` trait: list, get, create and delete of arbitrary
//! resources addressed by `ApiResource` and `Scope`. The trait allows
//! mocking the cluster in tests while using kube-rs in production.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;

#[cfg(test)]
use mockall::automock;

use olmrun_common::kube_utils::{api_resource, from_dynamic, is_not_found};
use olmrun_common::{Error, FIELD_MANAGER};

/// Where a resource lives
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Cluster-scoped resource (CRDs)
    Cluster,
    /// Resource in the named namespace
    Namespaced(String),
}

impl Scope {
    /// Scope for a namespace
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self::Namespaced(namespace.into())
    }

    /// Namespace of the scope, if namespaced
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Cluster => None,
            Self::Namespaced(ns) => Some(ns),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cluster => f.write_str("<cluster>"),
            Self::Namespaced(ns) => f.write_str(ns),
        }
    }
}

/// Trait abstracting the cluster operations install and uninstall need
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// List resources in a scope, filtered by `params`
    async fn list(
        &self,
        ar: &ApiResource,
        scope: &Scope,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Get a resource by name, `None` if it does not exist
    async fn get(
        &self,
        ar: &ApiResource,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Create a resource; fails if it already exists
    async fn create(
        &self,
        ar: &ApiResource,
        scope: &Scope,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Delete a resource by name
    ///
    /// Returns `false` when the resource did not exist.
    async fn delete(&self, ar: &ApiResource, scope: &Scope, name: &str) -> Result<bool, Error>;
}

/// List typed resources through a `ResourceClient`
pub async fn list_typed<K>(
    client: &dyn ResourceClient,
    scope: &Scope,
    params: &ListParams,
) -> Result<Vec<K>, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .list(&api_resource::<K>(), scope, params)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

/// Get a typed resource through a `ResourceClient`
pub async fn get_typed<K>(
    client: &dyn ResourceClient,
    scope: &Scope,
    name: &str,
) -> Result<Option<K>, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .get(&api_resource::<K>(), scope, name)
        .await?
        .map(from_dynamic)
        .transpose()
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Create a new KubeResourceClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, scope: &Scope) -> Api<DynamicObject> {
        match scope {
            Scope::Cluster => Api::all_with(self.client.clone(), ar),
            Scope::Namespaced(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn list(
        &self,
        ar: &ApiResource,
        scope: &Scope,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>, Error> {
        let list = self.api(ar, scope).list(params).await?;
        Ok(list.items)
    }

    async fn get(
        &self,
        ar: &ApiResource,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.api(ar, scope).get_opt(name).await?)
    }

    async fn create(
        &self,
        ar: &ApiResource,
        scope: &Scope,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(self.api(ar, scope).create(&params, obj).await?)
    }

    async fn delete(&self, ar: &ApiResource, scope: &Scope, name: &str) -> Result<bool, Error> {
        match self
            .api(ar, scope)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
