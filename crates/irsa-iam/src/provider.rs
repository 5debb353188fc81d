//! OIDC identity provider references
//!
//! An IamRole (or the operator default) names the provider either by its IAM
//! ARN or by the issuer host shown in the EKS console. The trust policy needs
//! both the principal ARN and the bare issuer.

use irsa_common::{Error, Result};

const OIDC_PROVIDER_MARKER: &str = ":oidc-provider/";

/// A parsed identity provider reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityProviderRef {
    /// Full provider ARN, used as-is
    Arn {
        /// `arn:<partition>:iam::<account>:oidc-provider/<issuer>`
        arn: String,
        /// Issuer host extracted from the ARN
        issuer: String,
    },
    /// Issuer host; the ARN is composed from the account id
    Issuer(String),
}

impl IdentityProviderRef {
    /// Parse a reference from CRD or operator configuration
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();

        if reference.starts_with("arn:") {
            let issuer = reference
                .split_once(OIDC_PROVIDER_MARKER)
                .map(|(_, issuer)| issuer.trim_end_matches('/'))
                .filter(|issuer| !issuer.is_empty())
                .ok_or_else(|| {
                    Error::validation_for_field(
                        reference,
                        "spec.identityProvider",
                        "ARN is not an IAM OIDC provider ARN",
                    )
                })?;
            return Ok(Self::Arn {
                arn: reference.to_string(),
                issuer: issuer.to_string(),
            });
        }

        let issuer = reference
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        if issuer.is_empty() {
            return Err(Error::validation_for_field(
                reference,
                "spec.identityProvider",
                "identity provider is empty",
            ));
        }
        Ok(Self::Issuer(issuer.to_string()))
    }

    /// Issuer host without scheme, as used in trust policy condition keys
    pub fn issuer(&self) -> &str {
        match self {
            Self::Arn { issuer, .. } => issuer,
            Self::Issuer(issuer) => issuer,
        }
    }

    /// Whether building the principal ARN needs the account id
    pub fn needs_account_id(&self) -> bool {
        matches!(self, Self::Issuer(_))
    }

    /// Principal ARN of the provider
    pub fn principal_arn(&self, partition: &str, account_id: &str) -> String {
        match self {
            Self::Arn { arn, .. } => arn.clone(),
            Self::Issuer(issuer) => format!(
                "arn:{}:iam::{}{}{}",
                partition, account_id, OIDC_PROVIDER_MARKER, issuer
            ),
        }
    }
}
