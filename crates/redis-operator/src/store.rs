//! Object store boundary
//!
//! Reconciliation talks to the cluster only through [`Store`]: single-object
//! reads, creates and merge patches. Optimistic concurrency is expressed by
//! putting `metadata.resourceVersion` into a patch; the store rejects the
//! write with [`OperatorError::Conflict`] if the version is stale.

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

#[cfg(test)]
pub(crate) mod memory;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "redis-operator";

/// Namespaced object types the operator reads and writes
pub trait ManagedObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ManagedObject for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Read/write access to objects keyed by (kind, namespace, name)
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Fetch an object; [`OperatorError::NotFound`] if absent
    async fn get<K: ManagedObject>(&self, namespace: &str, name: &str) -> Result<K>;

    /// Create an object; [`OperatorError::AlreadyExists`] if the name is taken
    async fn create<K: ManagedObject>(&self, obj: &K) -> Result<K>;

    /// Apply a JSON merge patch to the main resource
    async fn patch<K: ManagedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K>;

    /// Apply a JSON merge patch to the status subresource
    async fn patch_status<K: ManagedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K>;
}

/// [`Store`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: ManagedObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get<K: ManagedObject>(&self, namespace: &str, name: &str) -> Result<K> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, &K::kind(&()), namespace, name))
    }

    async fn create<K: ManagedObject>(&self, obj: &K) -> Result<K> {
        let meta = obj.meta();
        let name = meta
            .name
            .as_deref()
            .ok_or_else(|| OperatorError::InvalidConfig(format!("{} missing metadata.name", K::kind(&()))))?;
        let namespace = meta.namespace.as_deref().ok_or_else(|| {
            OperatorError::InvalidConfig(format!("{} missing metadata.namespace", K::kind(&())))
        })?;

        debug!(kind = %K::kind(&()), name = %name, namespace = %namespace, "Creating object");

        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<K>(namespace)
            .create(&pp, obj)
            .await
            .map_err(|e| OperatorError::from_kube(e, &K::kind(&()), namespace, name))
    }

    async fn patch<K: ManagedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K> {
        debug!(kind = %K::kind(&()), name = %name, namespace = %namespace, "Patching object");

        let pp = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<K>(namespace)
            .patch(name, &pp, &Patch::Merge(patch))
            .await
            .map_err(|e| OperatorError::from_kube(e, &K::kind(&()), namespace, name))
    }

    async fn patch_status<K: ManagedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K> {
        debug!(kind = %K::kind(&()), name = %name, namespace = %namespace, "Patching status");

        let pp = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<K>(namespace)
            .patch_status(name, &pp, &Patch::Merge(patch))
            .await
            .map_err(|e| OperatorError::from_kube(e, &K::kind(&()), namespace, name))
    }
}
