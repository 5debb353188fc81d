//! AWS IAM integration for the IRSA operator
//!
//! - [`policy`]: canonical policy and trust documents
//! - [`naming`]: deterministic AWS resource names
//! - [`client`]: the raw IAM API as a trait, with the AWS SDK behind [`sdk`]
//! - [`gateway`]: idempotent create/delete semantics and the policy version cap
//! - [`account`]: memoized account id lookup via STS

#![deny(missing_docs)]

pub mod account;
pub mod client;
pub mod gateway;
pub mod naming;
pub mod policy;
pub mod provider;
pub mod sdk;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use account::{AccountIdSource, AccountResolver, StsAccountSource};
pub use client::{IamClient, IamError, ManagedPolicy, PolicyVersion};
pub use gateway::{select_version_to_evict, IamGateway, PolicyHandle, MAX_POLICY_VERSIONS};
pub use naming::{generate_resource_name, MAX_RESOURCE_NAME_LEN};
pub use policy::{generate_policy_document, generate_trust_policy, POLICY_LANGUAGE_VERSION};
pub use provider::IdentityProviderRef;
pub use sdk::SdkIamClient;

/// Default ARN partition
pub const DEFAULT_PARTITION: &str = "aws";

/// Region used when `AWS_REGION` is not set
pub const DEFAULT_REGION: &str = "us-east-1";
