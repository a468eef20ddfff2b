//! Production `ResourceStore<T>` backed by `kube::Api<T>`.
//!
//! Grounded on the teacher's `infrastructure/database::AgentRepository`
//! SQLite implementation of the `AgentRepository` port: one struct per
//! backing technology, implementing the same trait the in-memory test
//! double implements, so reconcilers never see a concrete client type.

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

use crate::domain::error::StoreError;
use crate::domain::ports::ResourceStore;

/// Thin wrapper over `kube::Api<T>` namespaced to a single namespace.
///
/// `T` must be a `kube::CustomResource`-derived spec/status pair with a
/// cluster-scoped dynamic type of `()` — every Sympozium CRD satisfies
/// this by construction of its `#[kube(...)]` attribute.
pub struct KubeResourceStore<T> {
    api: Api<T>,
    field_manager: &'static str,
}

impl<T> KubeResourceStore<T>
where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    pub fn namespaced(client: Client, namespace: &str, field_manager: &'static str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            field_manager,
        }
    }
}

#[async_trait]
impl<T> ResourceStore<T> for KubeResourceStore<T>
where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<T>, StoreError> {
        match self.api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(StoreError::Request(e.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        self.api
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| StoreError::Request(e.to_string()))
    }

    async fn create(&self, _name: &str, object: T) -> Result<(), StoreError> {
        let params = PostParams {
            field_manager: Some(self.field_manager.to_string()),
            ..Default::default()
        };
        self.api
            .create(&params, &object)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
                other => StoreError::Request(other.to_string()),
            })
    }

    async fn update(&self, name: &str, object: T) -> Result<(), StoreError> {
        let params = PatchParams::apply(self.field_manager).force();
        self.api
            .patch(name, &params, &Patch::Apply(&object))
            .await
            .map(|_| ())
            .map_err(|e| match e {
                kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
                other => StoreError::Request(other.to_string()),
            })
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        match self.api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(StoreError::Request(e.to_string())),
        }
    }
}
