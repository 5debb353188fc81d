//! IamRole controller
//!
//! A pass over an IamRole runs in this order:
//!
//! 1. attach the cleanup finalizer
//! 2. validate the spec and resolve the identity provider
//! 3. run the convergence steps (policy, document, role, binding, ServiceAccount)
//!
//! A deleted IamRole instead runs the teardown steps and drops the finalizer.
//! Configuration and validation failures stop the pass before any IAM call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use irsa_common::crd::IamRole;
use irsa_common::Error;
use irsa_iam::{IamGateway, IdentityProviderRef};

use crate::finalizer::ensure_finalizer;
use crate::steps::{converge, teardown, ConvergeOutcome, Plan};
use crate::store::{KubeRoleStore, RoleStore};

/// Periodic resync of converged IamRoles
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue delay after a retryable failure
const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Operator-wide settings that affect every IamRole
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Identity provider for IamRoles that do not name one
    pub default_identity_provider: Option<String>,
    /// Distinguishes installations sharing an AWS account in generated names
    pub instance_id: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            default_identity_provider: None,
            instance_id: "default".to_string(),
        }
    }
}

/// Shared context for the IamRole controller
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client, gateway)
///     .settings(settings)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes operations (trait object for testability)
    pub store: Arc<dyn RoleStore>,
    /// Idempotent IAM operations
    pub iam: Arc<IamGateway>,
    /// Operator-wide settings
    pub settings: ControllerSettings,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, iam: Arc<IamGateway>) -> ContextBuilder {
        ContextBuilder::new(client, iam)
    }

    /// Create a context for testing with a substitute store
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn RoleStore>,
        iam: Arc<IamGateway>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            store,
            iam,
            settings,
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    iam: Arc<IamGateway>,
    store: Option<Arc<dyn RoleStore>>,
    settings: ControllerSettings,
}

impl ContextBuilder {
    fn new(client: Client, iam: Arc<IamGateway>) -> Self {
        Self {
            client,
            iam,
            store: None,
            settings: ControllerSettings::default(),
        }
    }

    /// Set operator-wide settings
    pub fn settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the object store (primarily for testing)
    pub fn store(mut self, store: Arc<dyn RoleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(KubeRoleStore::new(self.client.clone()))),
            iam: self.iam,
            settings: self.settings,
        }
    }
}

/// Pick the identity provider for `role`: its own, else the operator default
pub fn resolve_identity_provider(
    role: &IamRole,
    settings: &ControllerSettings,
) -> Result<IdentityProviderRef, Error> {
    let reference = role
        .spec
        .identity_provider
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .or(settings.default_identity_provider.as_deref())
        .ok_or_else(|| {
            Error::configuration(
                role.resource_key(),
                "no identity provider: set spec.identityProvider or configure an operator default",
            )
        })?;
    IdentityProviderRef::parse(reference)
}

/// Reconcile an IamRole
///
/// # Arguments
///
/// * `role` - The IamRole to reconcile
/// * `ctx` - Shared controller context
///
/// # Returns
///
/// An `Action` saying when to look at the IamRole again, or the error that
/// stopped the pass. Nothing is retried within a pass.
#[instrument(
    skip(role, ctx),
    fields(role = %role.name_any(), namespace = %role.namespace().unwrap_or_default())
)]
pub async fn reconcile(role: Arc<IamRole>, ctx: Arc<Context>) -> Result<Action, Error> {
    let started = Instant::now();

    if role.is_deleting() {
        if !role.has_finalizer() {
            debug!("deleted without finalizer, nothing to clean up");
            return Ok(Action::await_change());
        }
        let performed = teardown(&role, &ctx).await?;
        info!(
            steps = performed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "AWS resources removed"
        );
        return Ok(Action::await_change());
    }

    ensure_finalizer(&role, ctx.store.as_ref()).await?;

    role.spec
        .validate()
        .map_err(|msg| Error::validation_for_field(role.resource_key(), "spec", msg))?;
    let provider = resolve_identity_provider(&role, &ctx.settings)?;
    let plan = Plan::build(&role, provider, &ctx.settings)?;

    match converge(&role, &plan, &ctx).await? {
        ConvergeOutcome::Converged(performed) => {
            if performed.is_empty() {
                debug!("already converged");
            } else {
                info!(
                    steps = performed.len(),
                    role_name = %plan.resource_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "converged"
                );
            }
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        ConvergeOutcome::Interrupted => {
            debug!("IamRole removed or deleting, stopping pass");
            Ok(Action::await_change())
        }
    }
}

/// Error policy for the IamRole controller
///
/// Retryable errors requeue after a short delay. Validation and configuration
/// errors wait for the IamRole to change.
pub fn error_policy(role: Arc<IamRole>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(
            %error,
            role = %role.name_any(),
            namespace = %role.namespace().unwrap_or_default(),
            "reconciliation failed, will retry"
        );
        Action::requeue(RETRY_INTERVAL)
    } else {
        error!(
            %error,
            role = %role.name_any(),
            namespace = %role.namespace().unwrap_or_default(),
            "reconciliation failed, waiting for a spec change"
        );
        Action::await_change()
    }
}
