//! Cleanup finalizer on IamRoles
//!
//! The finalizer is added before any AWS resource exists and removed only
//! after teardown, so Kubernetes cannot drop an IamRole while it still owns
//! IAM entities.

use kube::ResourceExt;
use tracing::info;

use irsa_common::crd::IamRole;
use irsa_common::{Error, ROLE_FINALIZER};

use crate::store::RoleStore;

/// Attach the cleanup finalizer if missing. Returns `true` if it was added.
pub async fn ensure_finalizer(role: &IamRole, store: &dyn RoleStore) -> Result<bool, Error> {
    if role.has_finalizer() {
        return Ok(false);
    }
    let namespace = role.namespace().unwrap_or_default();
    store
        .add_finalizer(&namespace, &role.name_any(), ROLE_FINALIZER)
        .await?;
    info!(role = %role.name_any(), namespace = %namespace, "added cleanup finalizer");
    Ok(true)
}

/// Drop the cleanup finalizer, letting Kubernetes delete the IamRole
pub async fn release_finalizer(role: &IamRole, store: &dyn RoleStore) -> Result<(), Error> {
    let namespace = role.namespace().unwrap_or_default();
    store
        .remove_finalizer(&namespace, &role.name_any(), ROLE_FINALIZER)
        .await?;
    info!(role = %role.name_any(), namespace = %namespace, "removed cleanup finalizer");
    Ok(())
}
