//! The raw IAM API surface used by the operator
//!
//! [`IamClient`] mirrors the IAM calls one to one and reports failures as
//! [`IamError`] so callers can tell "already exists" and "not found" apart
//! from real failures. Idempotency is layered on top in
//! [`crate::gateway::IamGateway`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// An IAM managed policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedPolicy {
    /// Policy ARN
    pub arn: String,
    /// Policy name
    pub name: String,
    /// Version currently in effect
    pub default_version_id: Option<String>,
}

/// One stored version of a managed policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyVersion {
    /// Version identifier (`v1`, `v2`, ...)
    pub version_id: String,
    /// Whether this is the version in effect
    pub is_default: bool,
    /// Creation time reported by IAM
    pub created_at: Option<DateTime<Utc>>,
}

/// Failure of a single IAM call
#[derive(Debug, Error)]
pub enum IamError {
    /// The entity being created already exists
    #[error("{operation}: entity already exists: {message}")]
    AlreadyExists {
        /// IAM operation name
        operation: &'static str,
        /// Message returned by IAM
        message: String,
    },

    /// The entity does not exist
    #[error("{operation}: no such entity: {message}")]
    NotFound {
        /// IAM operation name
        operation: &'static str,
        /// Message returned by IAM
        message: String,
    },

    /// Request rate exceeded
    #[error("{operation}: throttled: {message}")]
    Throttled {
        /// IAM operation name
        operation: &'static str,
        /// Message returned by IAM
        message: String,
    },

    /// Any other error code returned by IAM
    #[error("{operation}: {code}: {message}")]
    Service {
        /// IAM operation name
        operation: &'static str,
        /// IAM error code (e.g. "DeleteConflict")
        code: String,
        /// Message returned by IAM
        message: String,
        /// Whether the same request can succeed later
        retryable: bool,
    },

    /// The request never produced a service response (network, credentials, timeout)
    #[error("{operation}: {message}")]
    Transport {
        /// IAM operation name
        operation: &'static str,
        /// Description of the failure
        message: String,
    },
}

impl IamError {
    /// IAM operation that failed
    pub fn operation(&self) -> &'static str {
        match self {
            IamError::AlreadyExists { operation, .. }
            | IamError::NotFound { operation, .. }
            | IamError::Throttled { operation, .. }
            | IamError::Service { operation, .. }
            | IamError::Transport { operation, .. } => operation,
        }
    }

    /// Whether IAM reported that the entity already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, IamError::AlreadyExists { .. })
    }

    /// Whether IAM reported that the entity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, IamError::NotFound { .. })
    }

    /// Whether IAM refused a delete because dependent entities remain
    pub fn is_delete_conflict(&self) -> bool {
        matches!(self, IamError::Service { code, .. } if code == "DeleteConflict")
    }

    /// Whether the same request can succeed on a later pass
    pub fn is_retryable(&self) -> bool {
        match self {
            IamError::Service { retryable, .. } => *retryable,
            _ => true,
        }
    }
}

impl From<IamError> for irsa_common::Error {
    fn from(err: IamError) -> Self {
        let operation = err.operation();
        if err.is_retryable() {
            irsa_common::Error::cloud(operation, err.to_string())
        } else {
            irsa_common::Error::cloud_permanent(operation, err.to_string())
        }
    }
}

/// Raw IAM operations
///
/// This trait allows substituting IAM in tests while using the AWS SDK
/// in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamClient: Send + Sync {
    /// Create a managed policy whose first version is `document`
    async fn create_policy(&self, name: &str, document: &str) -> Result<ManagedPolicy, IamError>;

    /// Get a managed policy by ARN
    async fn get_policy(&self, arn: &str) -> Result<ManagedPolicy, IamError>;

    /// Delete a managed policy (IAM requires non-default versions to be gone)
    async fn delete_policy(&self, arn: &str) -> Result<(), IamError>;

    /// List the stored versions of a policy
    async fn list_policy_versions(&self, arn: &str) -> Result<Vec<PolicyVersion>, IamError>;

    /// Store a new version of a policy
    async fn create_policy_version(
        &self,
        arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<PolicyVersion, IamError>;

    /// Delete a non-default version of a policy
    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<(), IamError>;

    /// Create a role with the given trust policy
    async fn create_role(
        &self,
        name: &str,
        trust_document: &str,
        description: &str,
    ) -> Result<(), IamError>;

    /// Delete a role (IAM requires its policies to be detached)
    async fn delete_role(&self, name: &str) -> Result<(), IamError>;

    /// Attach a managed policy to a role
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), IamError>;

    /// Detach a managed policy from a role
    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), IamError>;

    /// ARNs of the managed policies attached to a role
    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>, IamError>;
}
