//! Object store access
//!
//! Reconcilers talk to the API server through [`ObjectStore`] so the phase
//! logic does not depend on a live cluster. [`KubeStore`] is the production
//! implementation on top of `kube::Api`.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::error::{Error, Result};

/// Bounds every namespaced resource handled by the operator satisfies
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// CRUD access to one resource kind
#[async_trait]
pub trait ObjectStore<K: StoredObject>: Send + Sync {
    /// Fetch an object; `Error::NotFound` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    /// List objects in a namespace
    async fn list(&self, namespace: &str) -> Result<Vec<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace metadata and spec; rejected with `Error::Conflict` on a stale resourceVersion
    async fn update(&self, obj: &K) -> Result<K>;

    /// Replace the status subresource
    async fn update_status(&self, obj: &K) -> Result<K>;

    async fn delete(&self, obj: &K) -> Result<()>;
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: "backups-operator".to_string(),
            _kind: PhantomData,
        }
    }
}

impl<K: StoredObject> KubeStore<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for(&self, obj: &K) -> Api<K> {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        self.api(&namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }
}

/// Map API errors onto the store's not-found/conflict variants
fn store_error(kind: &str, name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => {
            Error::NotFound(format!("{} {}", kind, name))
        }
        kube::Error::Api(resp) if resp.code == 409 => {
            Error::Conflict(format!("{} {}: {}", kind, name, resp.message))
        }
        other => Error::Kube(other),
    }
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| store_error(&K::kind(&()), name, e))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        self.api_for(obj)
            .create(&self.post_params(), obj)
            .await
            .map_err(|e| store_error(&K::kind(&()), &obj.name_any(), e))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api_for(obj)
            .replace(&name, &self.post_params(), obj)
            .await
            .map_err(|e| store_error(&K::kind(&()), &name, e))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let value = serde_json::to_value(obj)?;
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status").cloned().unwrap_or_default(),
        });

        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api_for(obj)
            .patch_status(&name, &params, &Patch::Merge(patch))
            .await
            .map_err(|e| store_error(&K::kind(&()), &name, e))
    }

    async fn delete(&self, obj: &K) -> Result<()> {
        let name = obj.name_any();
        self.api_for(obj)
            .delete(&name, &DeleteParams::default())
            .await
            .map_err(|e| store_error(&K::kind(&()), &name, e))?;
        Ok(())
    }
}
