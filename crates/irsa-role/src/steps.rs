//! Ordered convergence and teardown steps
//!
//! All progress lives in [`IamRoleStatus`]. Each step is a predicate over the
//! status plus an action; the drivers walk the list in order, skip satisfied
//! steps, and stop at the first failure. Before acting, a driver re-reads the
//! IamRole so the status write that records the step is conditional on the
//! latest resourceVersion. A pass that finds every step satisfied makes no
//! calls at all.

use std::fmt;

use kube::ResourceExt;
use tracing::{debug, info};

use irsa_common::crd::{IamRole, IamRoleStatus};
use irsa_common::{Error, Result};
use irsa_iam::{
    generate_policy_document, generate_resource_name, generate_trust_policy, IdentityProviderRef,
};

use crate::controller::{Context, ControllerSettings};
use crate::finalizer::release_finalizer;
use crate::service_account::build_service_account;

/// Everything a pass derives from the spec before touching AWS
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    /// Namespace of the IamRole and its ServiceAccount
    pub namespace: String,
    /// Name of the IamRole and its ServiceAccount
    pub name: String,
    /// Name of the IAM role and managed policy
    pub resource_name: String,
    /// Canonical policy document for the current spec
    pub policy_document: String,
    /// OIDC provider the role trusts
    pub provider: IdentityProviderRef,
}

impl Plan {
    /// Derive the plan for `role`
    pub fn build(
        role: &IamRole,
        provider: IdentityProviderRef,
        settings: &ControllerSettings,
    ) -> Result<Self> {
        let namespace = role
            .namespace()
            .ok_or_else(|| Error::validation_for(role.name_any(), "IamRole must be namespaced"))?;
        let name = role.name_any();
        let resource_name =
            generate_resource_name(&name, &namespace, &settings.instance_id, &role.uid_prefix()?);
        let policy_document = generate_policy_document(&role.spec.statements)?;

        Ok(Self {
            namespace,
            name,
            resource_name,
            policy_document,
            provider,
        })
    }

    fn resource_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Steps that bring AWS and the ServiceAccount in line with the spec
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergeStep {
    /// Create the managed policy
    EnsurePolicy,
    /// Push a new policy version when the document drifted
    SyncPolicyDocument,
    /// Create the role trusting the ServiceAccount
    EnsureRole,
    /// Attach the policy to the role
    BindPolicy,
    /// Create the annotated ServiceAccount
    EnsureServiceAccount,
}

impl ConvergeStep {
    /// Execution order
    pub const ORDER: [ConvergeStep; 5] = [
        ConvergeStep::EnsurePolicy,
        ConvergeStep::SyncPolicyDocument,
        ConvergeStep::EnsureRole,
        ConvergeStep::BindPolicy,
        ConvergeStep::EnsureServiceAccount,
    ];

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ConvergeStep::EnsurePolicy => "ensure-policy",
            ConvergeStep::SyncPolicyDocument => "sync-policy-document",
            ConvergeStep::EnsureRole => "ensure-role",
            ConvergeStep::BindPolicy => "bind-policy",
            ConvergeStep::EnsureServiceAccount => "ensure-service-account",
        }
    }

    /// Whether the status already records this step as done for `plan`
    pub fn is_satisfied(&self, status: &IamRoleStatus, plan: &Plan) -> bool {
        match self {
            ConvergeStep::EnsurePolicy => !status.policy_arn.is_empty(),
            ConvergeStep::SyncPolicyDocument => {
                status.applied_policy_document == plan.policy_document
            }
            ConvergeStep::EnsureRole => !status.role_name.is_empty(),
            ConvergeStep::BindPolicy => status.policy_bound,
            ConvergeStep::EnsureServiceAccount => status.service_account_created,
        }
    }

    /// Perform the step and return the status that records it
    async fn apply(
        &self,
        role: &IamRole,
        status: &IamRoleStatus,
        plan: &Plan,
        ctx: &Context,
    ) -> Result<IamRoleStatus> {
        let mut next = IamRoleStatus {
            reconciled: false,
            ..status.clone()
        };

        match self {
            ConvergeStep::EnsurePolicy => {
                let handle = ctx
                    .iam
                    .create_policy(&plan.resource_name, &plan.policy_document)
                    .await?;
                next.policy_arn = handle.arn;
                if handle.created {
                    // a new policy's first version is this document
                    next.applied_policy_document = plan.policy_document.clone();
                } else {
                    next.applied_policy_document.clear();
                }
            }
            ConvergeStep::SyncPolicyDocument => {
                require(&status.policy_arn, "policyArn", plan)?;
                ctx.iam
                    .update_policy_document(&status.policy_arn, &plan.policy_document)
                    .await?;
                next.applied_policy_document = plan.policy_document.clone();
            }
            ConvergeStep::EnsureRole => {
                let principal = if plan.provider.needs_account_id() {
                    let account = ctx.iam.account_id().await?;
                    plan.provider.principal_arn(ctx.iam.partition(), account)
                } else {
                    plan.provider.principal_arn(ctx.iam.partition(), "")
                };
                let trust = generate_trust_policy(
                    &principal,
                    plan.provider.issuer(),
                    &plan.namespace,
                    &plan.name,
                )?;
                let description = format!(
                    "Assumed by ServiceAccount {} in namespace {}",
                    plan.name, plan.namespace
                );
                ctx.iam
                    .create_role(&plan.resource_name, &trust, &description)
                    .await?;
                next.role_name = plan.resource_name.clone();
            }
            ConvergeStep::BindPolicy => {
                require(&status.role_name, "roleName", plan)?;
                require(&status.policy_arn, "policyArn", plan)?;
                ctx.iam
                    .attach_policy(&status.role_name, &status.policy_arn)
                    .await?;
                next.policy_bound = true;
            }
            ConvergeStep::EnsureServiceAccount => {
                require(&status.role_name, "roleName", plan)?;
                let role_arn = ctx.iam.role_arn(&status.role_name).await?;
                let service_account = build_service_account(role, &role_arn)?;
                ctx.store.apply_service_account(&service_account).await?;
                next.service_account_created = true;
            }
        }

        Ok(next)
    }
}

impl fmt::Display for ConvergeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Steps that remove the AWS resources, in dependency order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownStep {
    /// Detach the policy from the role
    DetachPolicy,
    /// Delete the role
    DeleteRole,
    /// Delete the policy and its versions
    DeletePolicy,
}

impl TeardownStep {
    /// Execution order
    pub const ORDER: [TeardownStep; 3] = [
        TeardownStep::DetachPolicy,
        TeardownStep::DeleteRole,
        TeardownStep::DeletePolicy,
    ];

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            TeardownStep::DetachPolicy => "detach-policy",
            TeardownStep::DeleteRole => "delete-role",
            TeardownStep::DeletePolicy => "delete-policy",
        }
    }

    /// Whether the resource this step removes was ever created
    pub fn is_pending(&self, status: &IamRoleStatus) -> bool {
        match self {
            TeardownStep::DetachPolicy => status.policy_bound,
            TeardownStep::DeleteRole => !status.role_name.is_empty(),
            TeardownStep::DeletePolicy => !status.policy_arn.is_empty(),
        }
    }

    async fn apply(&self, status: &IamRoleStatus, ctx: &Context) -> Result<IamRoleStatus> {
        let mut next = IamRoleStatus {
            reconciled: false,
            ..status.clone()
        };

        match self {
            TeardownStep::DetachPolicy => {
                ctx.iam
                    .detach_policy(&status.role_name, &status.policy_arn)
                    .await?;
                next.policy_bound = false;
            }
            TeardownStep::DeleteRole => {
                ctx.iam.delete_role(&status.role_name).await?;
                next.role_name.clear();
            }
            TeardownStep::DeletePolicy => {
                ctx.iam.delete_policy(&status.policy_arn).await?;
                next.policy_arn.clear();
                next.applied_policy_document.clear();
            }
        }

        Ok(next)
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn require(value: &str, field: &str, plan: &Plan) -> Result<()> {
    if value.is_empty() {
        return Err(Error::internal_with_context(
            "reconciler",
            format!("{}: status.{} is empty", plan.resource_key(), field),
        ));
    }
    Ok(())
}

/// How a convergence pass ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// Every step is satisfied; lists the steps this pass performed
    Converged(Vec<ConvergeStep>),
    /// The IamRole was deleted or marked for deletion mid-pass
    Interrupted,
}

/// Run the convergence steps for `role`
pub async fn converge(role: &IamRole, plan: &Plan, ctx: &Context) -> Result<ConvergeOutcome> {
    let mut status = role.status_or_default();
    let mut performed = Vec::new();

    for step in ConvergeStep::ORDER {
        if step.is_satisfied(&status, plan) {
            continue;
        }

        let Some(current) = ctx.store.get(&plan.namespace, &plan.name).await? else {
            return Ok(ConvergeOutcome::Interrupted);
        };
        if current.is_deleting() {
            return Ok(ConvergeOutcome::Interrupted);
        }
        status = current.status_or_default();
        if step.is_satisfied(&status, plan) {
            debug!(step = %step, "step satisfied by a concurrent pass");
            continue;
        }

        debug!(step = %step, "applying step");
        let next = step.apply(&current, &status, plan, ctx).await?;
        ctx.store.patch_status(&current, &next).await?;
        info!(step = %step, role = %plan.name, namespace = %plan.namespace, "step complete");

        status = next;
        performed.push(step);
    }

    if !status.reconciled {
        let Some(current) = ctx.store.get(&plan.namespace, &plan.name).await? else {
            return Ok(ConvergeOutcome::Interrupted);
        };
        let latest = current.status_or_default();
        if !ConvergeStep::ORDER.iter().all(|s| s.is_satisfied(&latest, plan)) {
            return Err(Error::conflict(
                plan.resource_key(),
                "status changed while converging",
            ));
        }
        ctx.store
            .patch_status(
                &current,
                &IamRoleStatus {
                    reconciled: true,
                    ..latest
                },
            )
            .await?;
    }

    Ok(ConvergeOutcome::Converged(performed))
}

/// Run the teardown steps for `role`, then release its finalizer
///
/// Returns the steps performed.
pub async fn teardown(role: &IamRole, ctx: &Context) -> Result<Vec<TeardownStep>> {
    let namespace = role.namespace().unwrap_or_default();
    let name = role.name_any();
    let mut status = role.status_or_default();
    let mut performed = Vec::new();

    for step in TeardownStep::ORDER {
        if !step.is_pending(&status) {
            continue;
        }

        let Some(current) = ctx.store.get(&namespace, &name).await? else {
            return Ok(performed);
        };
        status = current.status_or_default();
        if !step.is_pending(&status) {
            continue;
        }

        debug!(step = %step, "applying teardown step");
        let next = step.apply(&status, ctx).await?;
        ctx.store.patch_status(&current, &next).await?;
        info!(step = %step, role = %name, namespace = %namespace, "teardown step complete");

        status = next;
        performed.push(step);
    }

    release_finalizer(role, ctx.store.as_ref()).await?;
    Ok(performed)
}
