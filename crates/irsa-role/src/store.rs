//! Kubernetes object-store access for the IamRole controller

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use irsa_common::crd::{IamRole, IamRoleStatus};
use irsa_common::{Error, FIELD_MANAGER};

/// Trait abstracting the Kubernetes operations of the IamRole controller
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Get the latest stored IamRole, `None` if it no longer exists
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<IamRole>, Error>;

    /// Add a finalizer to an IamRole (no-op if present)
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from an IamRole (no-op if absent or the object is gone)
    async fn remove_finalizer(&self, namespace: &str, name: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Replace the status of `role`
    ///
    /// The write is conditional on `role`'s resourceVersion; if the stored
    /// object changed since it was read this fails with [`Error::Conflict`].
    async fn patch_status(&self, role: &IamRole, status: &IamRoleStatus) -> Result<(), Error>;

    /// Create or update a ServiceAccount with server-side apply
    async fn apply_service_account(&self, service_account: &ServiceAccount) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeRoleStore {
    client: Client,
}

impl KubeRoleStore {
    /// Create a new store wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn roles(&self, namespace: &str) -> Api<IamRole> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn write_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        self.roles(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Turn a 409 from the API server into a conflict error
fn map_write_error(resource: String, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(resource, ae.message.clone()),
        _ => Error::from(err),
    }
}

#[async_trait]
impl RoleStore for KubeRoleStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<IamRole>, Error> {
        Ok(self.roles(namespace).get_opt(name).await?)
    }

    async fn add_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let role = self.roles(namespace).get(name).await?;
        let mut finalizers = role.metadata.finalizers.unwrap_or_default();

        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }

        finalizers.push(finalizer.to_string());
        self.write_finalizers(namespace, name, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let Some(role) = self.roles(namespace).get_opt(name).await? else {
            return Ok(());
        };

        let finalizers: Vec<String> = role
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        self.write_finalizers(namespace, name, finalizers).await
    }

    async fn patch_status(&self, role: &IamRole, status: &IamRoleStatus) -> Result<(), Error> {
        let namespace = role.namespace().unwrap_or_default();
        let name = role.name_any();

        // resourceVersion in a merge patch makes the write conditional
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": role.resource_version()
            },
            "status": status
        });

        self.roles(&namespace)
            .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error(role.resource_key(), e))?;

        debug!(role = %name, namespace = %namespace, "patched status");
        Ok(())
    }

    async fn apply_service_account(&self, service_account: &ServiceAccount) -> Result<(), Error> {
        let namespace = service_account.namespace().unwrap_or_default();
        let name = service_account.name_any();

        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(service_account),
        )
        .await?;
        Ok(())
    }
}
