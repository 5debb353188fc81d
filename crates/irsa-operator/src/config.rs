//! Command line and environment configuration

use clap::{Args, Parser};

use irsa_iam::{IdentityProviderRef, DEFAULT_PARTITION};
use irsa_role::ControllerSettings;

/// IRSA operator - provisions AWS IAM roles for Kubernetes ServiceAccounts
#[derive(Parser, Debug)]
#[command(name = "irsa-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the IamRole CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    /// Runtime settings
    #[command(flatten)]
    pub config: OperatorConfig,
}

/// Runtime settings of the operator
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Default OIDC identity provider (ARN or issuer host) for IamRoles without one
    #[arg(long = "oidc-provider", env = "IRSA_OIDC_PROVIDER")]
    pub oidc_provider: Option<String>,

    /// Identifier of this installation, folded into generated IAM names
    #[arg(long, env = "IRSA_INSTANCE_ID", default_value = "default")]
    pub instance_id: String,

    /// AWS account id; looked up through STS when unset
    #[arg(long, env = "IRSA_AWS_ACCOUNT_ID")]
    pub account_id: Option<String>,

    /// AWS partition used to build ARNs
    #[arg(long, env = "IRSA_AWS_PARTITION", default_value = DEFAULT_PARTITION)]
    pub partition: String,

    /// Emit JSON log lines
    #[arg(long, env = "IRSA_LOG_JSON")]
    pub log_json: bool,

    /// Do not install the CRD on startup
    #[arg(long)]
    pub skip_crd_install: bool,
}

impl OperatorConfig {
    /// Reject settings that would fail every reconciliation
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instance_id.trim().is_empty() {
            anyhow::bail!("--instance-id must not be empty");
        }
        if self.partition.trim().is_empty() {
            anyhow::bail!("--partition must not be empty");
        }
        if let Some(account) = &self.account_id {
            if account.len() != 12 || !account.bytes().all(|b| b.is_ascii_digit()) {
                anyhow::bail!("--account-id must be 12 digits, got {:?}", account);
            }
        }
        if let Some(provider) = &self.oidc_provider {
            IdentityProviderRef::parse(provider)
                .map_err(|e| anyhow::anyhow!("invalid --oidc-provider: {}", e))?;
        }
        Ok(())
    }

    /// Settings handed to the IamRole controller
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            default_identity_provider: self
                .oidc_provider
                .clone()
                .filter(|p| !p.trim().is_empty()),
            instance_id: self.instance_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("irsa-operator").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn defaults() {
        let cli = parse(&[]);
        assert!(!cli.crd);
        assert_eq!(cli.config.instance_id, "default");
        assert_eq!(cli.config.partition, "aws");
        assert!(cli.config.account_id.is_none());
        assert!(!cli.config.skip_crd_install);
        cli.config.validate().expect("defaults are valid");
    }

    #[test]
    fn flags_map_to_controller_settings() {
        let cli = parse(&[
            "--oidc-provider",
            "oidc.eks.eu-west-1.amazonaws.com/id/ABC",
            "--instance-id",
            "prod-eu",
            "--partition",
            "aws-cn",
            "--skip-crd-install",
        ]);
        cli.config.validate().expect("valid");
        assert_eq!(cli.config.partition, "aws-cn");
        assert!(cli.config.skip_crd_install);

        let settings = cli.config.controller_settings();
        assert_eq!(
            settings.default_identity_provider.as_deref(),
            Some("oidc.eks.eu-west-1.amazonaws.com/id/ABC")
        );
        assert_eq!(settings.instance_id, "prod-eu");
    }

    #[test]
    fn malformed_default_provider_is_rejected() {
        let cli = parse(&["--oidc-provider", "arn:aws:iam::123456789012:role/admin"]);
        assert!(cli.config.validate().is_err());
    }

    #[test]
    fn account_id_must_be_twelve_digits() {
        let cli = parse(&["--account-id", "123456789012"]);
        cli.config.validate().expect("valid");
        assert_eq!(cli.config.account_id.as_deref(), Some("123456789012"));

        for bad in ["12345", "12345678901a", "1234567890123"] {
            let cli = parse(&["--account-id", bad]);
            assert!(cli.config.validate().is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn empty_instance_id_is_rejected() {
        let cli = parse(&["--instance-id", " "]);
        assert!(cli.config.validate().is_err());
    }
}
