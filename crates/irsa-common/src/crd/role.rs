//! IamRole CRD: an AWS IAM role and managed policy bound to a ServiceAccount
//!
//! An IamRole declares the permissions a workload needs. The operator creates
//! an IAM managed policy from the statements, a role trusting the cluster's
//! OIDC provider for exactly this ServiceAccount, attaches the two, and
//! creates the annotated ServiceAccount with the same name as the IamRole.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, ROLE_FINALIZER};

/// How many characters of the object UID are folded into generated AWS names
pub const UID_PREFIX_LEN: usize = 8;

/// IAM condition block: `{ operator: { condition key: [values] } }`
///
/// Example: `{"StringEquals": {"s3:prefix": ["home/"]}}`
pub type ConditionBlock = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// IamRole declares an IAM role for the ServiceAccount of the same name.
///
/// Example:
/// ```yaml
/// apiVersion: irsa.dev/v1alpha1
/// kind: IamRole
/// metadata:
///   name: s3-reader
///   namespace: analytics
/// spec:
///   statements:
///     - effect: Allow
///       actions: ["s3:GetObject", "s3:ListBucket"]
///       resources: ["arn:aws:s3:::reports", "arn:aws:s3:::reports/*"]
///   identityProvider: oidc.eks.eu-west-1.amazonaws.com/id/EXAMPLED539D4633E53DE1B71EXAMPLE
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "irsa.dev",
    version = "v1alpha1",
    kind = "IamRole",
    namespaced,
    status = "IamRoleStatus",
    shortname = "iamr",
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".status.roleName"}"#,
    printcolumn = r#"{"name":"Policy","type":"string","jsonPath":".status.policyArn","priority":1}"#,
    printcolumn = r#"{"name":"Reconciled","type":"boolean","jsonPath":".status.reconciled"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IamRoleSpec {
    /// Statements of the managed policy, in order
    pub statements: Vec<PolicyStatement>,

    /// OIDC provider trusted by the role. Either the provider ARN
    /// (`arn:aws:iam::123456789012:oidc-provider/oidc.eks...`) or the issuer
    /// host (`oidc.eks.<region>.amazonaws.com/id/<id>`).
    /// Falls back to the operator-wide default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,
}

/// A single IAM policy statement
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatement {
    /// Allow or Deny
    pub effect: Effect,

    /// IAM actions (e.g., "s3:GetObject")
    pub actions: Vec<String>,

    /// Resource ARNs the actions apply to
    pub resources: Vec<String>,

    /// Optional IAM condition block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionBlock>,
}

/// Statement effect
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Effect {
    /// Grant the actions
    #[default]
    Allow,
    /// Explicitly deny the actions
    Deny,
}

impl Effect {
    /// IAM spelling of the effect
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// Observed progress of an IamRole.
///
/// Each field records one completed AWS or Kubernetes mutation. Every field is
/// always serialized so a merge patch can reset it during teardown.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IamRoleStatus {
    /// All resources exist and the policy document is current
    #[serde(default)]
    pub reconciled: bool,

    /// Policy document text last pushed to AWS
    #[serde(default)]
    pub applied_policy_document: String,

    /// Name of the IAM role created for this resource
    #[serde(default)]
    pub role_name: String,

    /// ARN of the IAM managed policy created for this resource
    #[serde(default)]
    pub policy_arn: String,

    /// The policy is attached to the role
    #[serde(default)]
    pub policy_bound: bool,

    /// The annotated ServiceAccount exists
    #[serde(default)]
    pub service_account_created: bool,
}

impl IamRoleSpec {
    /// Validate the spec before any AWS resource is touched
    pub fn validate(&self) -> Result<(), String> {
        if self.statements.is_empty() {
            return Err("at least one statement is required".to_string());
        }

        for (i, statement) in self.statements.iter().enumerate() {
            if statement.actions.iter().all(|a| a.trim().is_empty()) {
                return Err(format!("statements[{}] must list at least one action", i));
            }
            if statement.resources.iter().all(|r| r.trim().is_empty()) {
                return Err(format!("statements[{}] must list at least one resource", i));
            }
        }

        if let Some(provider) = &self.identity_provider {
            if provider.trim().is_empty() {
                return Err("identityProvider must not be empty when set".to_string());
            }
        }

        Ok(())
    }
}

impl IamRole {
    /// `namespace/name` key used in logs and errors
    pub fn resource_key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// Leading characters of the object UID, used to tell apart recreated objects
    pub fn uid_prefix(&self) -> Result<String, Error> {
        let uid = self.metadata.uid.as_deref().ok_or_else(|| {
            Error::validation_for(self.resource_key(), "object has no uid yet")
        })?;
        Ok(uid.chars().take(UID_PREFIX_LEN).collect())
    }

    /// Current status, or the empty status of a never-reconciled object
    pub fn status_or_default(&self) -> IamRoleStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Whether the cleanup finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == ROLE_FINALIZER)
    }

    /// Whether the object has been marked for deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
