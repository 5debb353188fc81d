//! Common types for the IRSA operator: CRDs, errors, and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the IamRole CRD
pub const API_GROUP: &str = "irsa.dev";

/// Finalizer that blocks IamRole removal until AWS resources are cleaned up
pub const ROLE_FINALIZER: &str = "irsa.dev/cleanup";

/// ServiceAccount annotation read by the EKS pod identity webhook
pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Field manager used for every write the operator makes
pub const FIELD_MANAGER: &str = "irsa-operator";

/// Label key marking resources managed by the operator
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for resources managed by the operator
pub const LABEL_MANAGED_BY_IRSA: &str = "irsa-operator";
