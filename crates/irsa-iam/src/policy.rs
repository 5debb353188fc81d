//! Canonical IAM policy documents
//!
//! Drift is detected by comparing the generated text with the document last
//! pushed to AWS, so generation must be byte-for-byte reproducible: struct
//! fields serialize in declaration order, and actions, resources and
//! condition maps go through sorted collections.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use irsa_common::crd::{ConditionBlock, PolicyStatement};
use irsa_common::{Error, Result};

/// IAM policy language version
pub const POLICY_LANGUAGE_VERSION: &str = "2012-10-17";

/// Audience the EKS pod identity webhook requests tokens for
const STS_AUDIENCE: &str = "sts.amazonaws.com";

/// Action a federated web identity uses to assume a role
const ASSUME_ROLE_WITH_WEB_IDENTITY: &str = "sts:AssumeRoleWithWebIdentity";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyDocument<S> {
    version: &'static str,
    statement: Vec<S>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AccessStatement<'a> {
    effect: &'static str,
    action: BTreeSet<&'a str>,
    resource: BTreeSet<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    condition: Option<&'a ConditionBlock>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TrustStatement<'a> {
    effect: &'static str,
    principal: FederatedPrincipal<'a>,
    action: &'static str,
    condition: BTreeMap<&'static str, BTreeMap<String, &'a str>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct FederatedPrincipal<'a> {
    federated: &'a str,
}

/// Render the access policy for a list of statements.
///
/// Statement order is kept; duplicate and blank actions/resources are dropped
/// and the rest sorted.
pub fn generate_policy_document(statements: &[PolicyStatement]) -> Result<String> {
    if statements.is_empty() {
        return Err(Error::validation_for_field(
            "policy",
            "spec.statements",
            "at least one statement is required",
        ));
    }

    let statement = statements
        .iter()
        .map(|s| AccessStatement {
            effect: s.effect.as_str(),
            action: non_blank(&s.actions),
            resource: non_blank(&s.resources),
            condition: s.condition.as_ref().filter(|c| !c.is_empty()),
        })
        .collect();

    render(&PolicyDocument {
        version: POLICY_LANGUAGE_VERSION,
        statement,
    })
}

/// Render the trust policy letting one ServiceAccount assume a role through
/// the cluster's OIDC provider.
///
/// # Arguments
///
/// * `principal_arn` - ARN of the IAM OIDC identity provider
/// * `issuer` - Issuer host without scheme (e.g. `oidc.eks.eu-west-1.amazonaws.com/id/ABC`)
/// * `namespace` / `service_account` - the only subject allowed to assume the role
pub fn generate_trust_policy(
    principal_arn: &str,
    issuer: &str,
    namespace: &str,
    service_account: &str,
) -> Result<String> {
    let subject = format!("system:serviceaccount:{}:{}", namespace, service_account);

    let mut string_equals = BTreeMap::new();
    string_equals.insert(format!("{}:sub", issuer), subject.as_str());
    string_equals.insert(format!("{}:aud", issuer), STS_AUDIENCE);

    let mut condition = BTreeMap::new();
    condition.insert("StringEquals", string_equals);

    render(&PolicyDocument {
        version: POLICY_LANGUAGE_VERSION,
        statement: vec![TrustStatement {
            effect: "Allow",
            principal: FederatedPrincipal {
                federated: principal_arn,
            },
            action: ASSUME_ROLE_WITH_WEB_IDENTITY,
            condition,
        }],
    })
}

fn non_blank(values: &[String]) -> BTreeSet<&str> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect()
}

fn render<S: Serialize>(document: &PolicyDocument<S>) -> Result<String> {
    serde_json::to_string(document)
        .map_err(|e| Error::serialization_for_kind("PolicyDocument", e.to_string()))
}
