//! The ServiceAccount bound to an IamRole

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

use irsa_common::crd::IamRole;
use irsa_common::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_IRSA, ROLE_ARN_ANNOTATION};

/// Build the ServiceAccount for `role`, annotated with `role_arn`
///
/// The ServiceAccount shares the IamRole's name and namespace and is owned
/// by it, so Kubernetes garbage-collects it when the IamRole goes away.
pub fn build_service_account(role: &IamRole, role_arn: &str) -> Result<ServiceAccount, Error> {
    let owner = role.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation_for(role.resource_key(), "object has no uid for an owner reference")
    })?;

    Ok(ServiceAccount {
        metadata: ObjectMeta {
            name: Some(role.name_any()),
            namespace: role.namespace(),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED_BY.to_string(),
                LABEL_MANAGED_BY_IRSA.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                ROLE_ARN_ANNOTATION.to_string(),
                role_arn.to_string(),
            )])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        ..Default::default()
    })
}
