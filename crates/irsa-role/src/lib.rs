//! IamRole controller for the IRSA operator
//!
//! Converges AWS IAM (managed policy, role, attachment) and the annotated
//! ServiceAccount onto each IamRole, and removes the AWS resources again
//! when the IamRole is deleted.

#![deny(missing_docs)]

pub mod controller;
pub mod finalizer;
pub mod service_account;
pub mod steps;
pub mod store;

#[cfg(test)]
mod testing;

pub use controller::{
    error_policy, reconcile, resolve_identity_provider, Context, ContextBuilder,
    ControllerSettings,
};
pub use steps::{ConvergeOutcome, ConvergeStep, Plan, TeardownStep};
pub use store::{KubeRoleStore, RoleStore};
