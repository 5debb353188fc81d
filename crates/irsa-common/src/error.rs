//! Error types for the IRSA operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the context needed to tell which resource or
//! AWS operation failed, and whether another reconciliation pass can help.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for IRSA operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The stored object changed since it was read
    #[error("conflict on {resource}: {message}")]
    Conflict {
        /// Resource whose write was rejected (namespace/name)
        resource: String,
        /// Description of the conflict
        message: String,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Resource with the invalid spec (namespace/name)
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.statements")
        field: Option<String>,
    },

    /// Operator or resource configuration cannot be resolved
    #[error("configuration error for {resource}: {message}")]
    Configuration {
        /// Resource that cannot be reconciled (namespace/name)
        resource: String,
        /// Description of what's missing
        message: String,
    },

    /// AWS API error
    #[error("aws error [{operation}]: {message}")]
    Cloud {
        /// AWS operation that failed (e.g., "CreatePolicy")
        operation: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document or resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "startup")
        context: String,
    },
}

impl Error {
    /// Create a conflict error for a resource
    pub fn conflict(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without resource context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error for a resource
    pub fn configuration(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a retryable AWS error
    pub fn cloud(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            operation: operation.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable AWS error (e.g., malformed policy document)
    pub fn cloud_permanent(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            operation: operation.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, configuration and serialization errors need a spec or
    /// operator config change. Conflicts and most AWS errors clear up on the
    /// next pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // 409 and 429 are transient, other 4xx need a fix
                match source {
                    kube::Error::Api(ae) => {
                        !(400..500).contains(&ae.code) || ae.code == 409 || ae.code == 429
                    }
                    _ => true,
                }
            }
            Error::Conflict { .. } => true,
            Error::Validation { .. } => false,
            Error::Configuration { .. } => false,
            Error::Cloud { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the resource name if this error is associated with a specific IamRole
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Conflict { resource, .. } => Some(resource),
            Error::Validation { resource, .. } => Some(resource),
            Error::Configuration { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Cloud { operation, .. } => Some(operation),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} error", reason),
            reason: reason.to_string(),
            code,
        })
    }

    /// Story: a spec without statements never reaches AWS
    #[test]
    fn story_validation_errors_need_a_spec_change() {
        let err =
            Error::validation_for_field("team-a/reader", "spec.statements", "must not be empty");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("team-a/reader"));
        assert_eq!(err.resource(), Some("team-a/reader"));
        assert!(!err.is_retryable());

        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.statements"))
            }
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: a missing identity provider parks the resource
    #[test]
    fn story_configuration_errors_are_terminal() {
        let err = Error::configuration("team-a/reader", "no identity provider");
        assert!(err.to_string().contains("configuration error"));
        assert!(!err.is_retryable());
    }

    /// Story: throttling and conflicts are left to the next pass
    #[test]
    fn story_transient_errors_are_retryable() {
        assert!(Error::cloud("CreatePolicy", "Rate exceeded").is_retryable());
        assert!(Error::conflict("team-a/reader", "resourceVersion changed").is_retryable());
        assert!(!Error::cloud_permanent("CreatePolicy", "MalformedPolicyDocument").is_retryable());
    }

    #[test]
    fn kube_errors_retry_only_when_transient() {
        assert!(Error::from(api_error(409, "Conflict")).is_retryable());
        assert!(Error::from(api_error(429, "TooManyRequests")).is_retryable());
        assert!(Error::from(api_error(500, "InternalError")).is_retryable());
        assert!(!Error::from(api_error(403, "Forbidden")).is_retryable());
        assert!(!Error::from(api_error(422, "Invalid")).is_retryable());
    }

    #[test]
    fn cloud_error_exposes_operation_as_context() {
        let err = Error::cloud("DeleteRole", "DeleteConflict");
        assert_eq!(err.context(), Some("DeleteRole"));
        assert!(err.to_string().contains("[DeleteRole]"));
        assert_eq!(err.resource(), None);
    }

    #[test]
    fn internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
        assert!(err.is_retryable());
    }

    #[test]
    fn serialization_error_keeps_kind() {
        let err = Error::serialization_for_kind("PolicyDocument", "key must be a string");
        match &err {
            Error::Serialization { kind, .. } => {
                assert_eq!(kind.as_deref(), Some("PolicyDocument"))
            }
            _ => panic!("Expected Serialization variant"),
        }
        assert!(!err.is_retryable());
    }
}
