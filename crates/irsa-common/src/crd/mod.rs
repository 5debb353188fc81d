//! Custom Resource Definitions for the IRSA operator
//!
//! This module contains the IamRole CRD and its statement types.

mod role;

pub use role::{
    ConditionBlock, Effect, IamRole, IamRoleSpec, IamRoleStatus, PolicyStatement,
    UID_PREFIX_LEN,
};
