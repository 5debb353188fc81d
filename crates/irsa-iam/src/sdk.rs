//! [`IamClient`] backed by the AWS SDK

use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iam::primitives::DateTime as AwsDateTime;
use aws_sdk_iam::types::{Policy, PolicyVersion as AwsPolicyVersion};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::client::{IamClient, IamError, ManagedPolicy, PolicyVersion};

/// Error codes that will fail again until the input changes
const PERMANENT_ERROR_CODES: &[&str] = &[
    "MalformedPolicyDocument",
    "InvalidInput",
    "ValidationError",
];

/// Production IAM client
#[derive(Clone, Debug)]
pub struct SdkIamClient {
    client: aws_sdk_iam::Client,
}

impl SdkIamClient {
    /// Wrap an SDK client
    pub fn new(client: aws_sdk_iam::Client) -> Self {
        Self { client }
    }
}

fn classify<E, R>(operation: &'static str, err: SdkError<E, R>) -> IamError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    match err.code() {
        Some("EntityAlreadyExists") => IamError::AlreadyExists { operation, message },
        Some("NoSuchEntity") => IamError::NotFound { operation, message },
        Some("Throttling") | Some("ThrottlingException") => {
            IamError::Throttled { operation, message }
        }
        Some(code) => IamError::Service {
            operation,
            code: code.to_string(),
            message,
            retryable: !PERMANENT_ERROR_CODES.contains(&code),
        },
        None => IamError::Transport { operation, message },
    }
}

fn to_chrono(value: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

fn managed_policy(
    operation: &'static str,
    policy: Option<&Policy>,
) -> Result<ManagedPolicy, IamError> {
    let policy = policy.ok_or_else(|| IamError::Transport {
        operation,
        message: "response did not include the policy".to_string(),
    })?;
    let arn = policy.arn().ok_or_else(|| IamError::Transport {
        operation,
        message: "response did not include the policy ARN".to_string(),
    })?;
    Ok(ManagedPolicy {
        arn: arn.to_string(),
        name: policy.policy_name().unwrap_or_default().to_string(),
        default_version_id: policy.default_version_id().map(str::to_string),
    })
}

fn policy_version(version: &AwsPolicyVersion) -> Option<PolicyVersion> {
    Some(PolicyVersion {
        version_id: version.version_id()?.to_string(),
        is_default: version.is_default_version(),
        created_at: version.create_date().and_then(to_chrono),
    })
}

#[async_trait]
impl IamClient for SdkIamClient {
    async fn create_policy(&self, name: &str, document: &str) -> Result<ManagedPolicy, IamError> {
        const OP: &str = "CreatePolicy";
        let out = self
            .client
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        managed_policy(OP, out.policy())
    }

    async fn get_policy(&self, arn: &str) -> Result<ManagedPolicy, IamError> {
        const OP: &str = "GetPolicy";
        let out = self
            .client
            .get_policy()
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        managed_policy(OP, out.policy())
    }

    async fn delete_policy(&self, arn: &str) -> Result<(), IamError> {
        self.client
            .delete_policy()
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| classify("DeletePolicy", e))?;
        Ok(())
    }

    async fn list_policy_versions(&self, arn: &str) -> Result<Vec<PolicyVersion>, IamError> {
        // a policy holds at most five versions, one page is enough
        let out = self
            .client
            .list_policy_versions()
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| classify("ListPolicyVersions", e))?;
        let versions: Vec<PolicyVersion> =
            out.versions().iter().filter_map(policy_version).collect();
        debug!(policy_arn = %arn, count = versions.len(), "listed policy versions");
        Ok(versions)
    }

    async fn create_policy_version(
        &self,
        arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<PolicyVersion, IamError> {
        const OP: &str = "CreatePolicyVersion";
        let out = self
            .client
            .create_policy_version()
            .policy_arn(arn)
            .policy_document(document)
            .set_as_default(set_as_default)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        out.policy_version()
            .and_then(policy_version)
            .ok_or_else(|| IamError::Transport {
                operation: OP,
                message: "response did not include the policy version".to_string(),
            })
    }

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<(), IamError> {
        self.client
            .delete_policy_version()
            .policy_arn(arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| classify("DeletePolicyVersion", e))?;
        Ok(())
    }

    async fn create_role(
        &self,
        name: &str,
        trust_document: &str,
        description: &str,
    ) -> Result<(), IamError> {
        self.client
            .create_role()
            .role_name(name)
            .assume_role_policy_document(trust_document)
            .description(description)
            .send()
            .await
            .map_err(|e| classify("CreateRole", e))?;
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<(), IamError> {
        self.client
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| classify("DeleteRole", e))?;
        Ok(())
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), IamError> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify("AttachRolePolicy", e))?;
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), IamError> {
        self.client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify("DetachRolePolicy", e))?;
        Ok(())
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>, IamError> {
        // IAM caps managed policies per role well below one page
        let out = self
            .client
            .list_attached_role_policies()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| classify("ListAttachedRolePolicies", e))?;
        Ok(out
            .attached_policies()
            .iter()
            .filter_map(|p| p.policy_arn())
            .map(str::to_string)
            .collect())
    }
}
