//! IRSA Operator - AWS IAM roles for Kubernetes ServiceAccounts

use std::sync::Arc;

use clap::Parser;
use kube::Client;

use irsa_common::telemetry::{init_telemetry, TelemetryConfig};
use irsa_operator::config::Cli;
use irsa_operator::controller_runner::{build_context, build_role_controller, load_aws_config};
use irsa_operator::startup::{crd_manifests, ensure_crds_installed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    // kube and the AWS SDK both pull in rustls; pin the process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install aws-lc-rs crypto provider: {:?}", e);
    }

    init_telemetry(TelemetryConfig {
        json: cli.config.log_json,
        ..Default::default()
    })?;

    let config = cli.config;
    config.validate()?;
    tracing::info!(
        instance_id = %config.instance_id,
        partition = %config.partition,
        default_provider = config.oidc_provider.is_some(),
        "starting IRSA operator"
    );

    let client = Client::try_default().await?;
    if config.skip_crd_install {
        tracing::info!("skipping CRD installation");
    } else {
        ensure_crds_installed(&client).await?;
    }

    let aws = load_aws_config().await;
    let ctx = Arc::new(build_context(client.clone(), &aws, &config));

    build_role_controller(client, ctx).await;
    tracing::info!("controller stopped");
    Ok(())
}
