//! Controller runner - wires AWS clients, the context and the IamRole controller

use std::future::Future;
use std::sync::Arc;

use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use irsa_common::crd::IamRole;
use irsa_common::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_IRSA};
use irsa_iam::{
    AccountIdSource, AccountResolver, IamGateway, SdkIamClient, StsAccountSource, DEFAULT_REGION,
};
use irsa_role::{error_policy, reconcile, Context};

use crate::config::OperatorConfig;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Load AWS configuration from the default chain, falling back to `us-east-1`
pub async fn load_aws_config() -> SdkConfig {
    let region = RegionProviderChain::default_provider().or_else(Region::new(DEFAULT_REGION));
    aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .load()
        .await
}

/// Build the controller context from AWS configuration and operator settings
pub fn build_context(client: Client, aws: &SdkConfig, config: &OperatorConfig) -> Context {
    let iam = Arc::new(SdkIamClient::new(aws_sdk_iam::Client::new(aws)));
    let sts: Arc<dyn AccountIdSource> =
        Arc::new(StsAccountSource::new(aws_sdk_sts::Client::new(aws)));
    let accounts = Arc::new(match &config.account_id {
        Some(account_id) => AccountResolver::with_account_id(account_id.clone(), sts),
        None => AccountResolver::new(sts),
    });
    let gateway = Arc::new(IamGateway::new(iam, accounts, config.partition.clone()));

    Context::builder(client, gateway)
        .settings(config.controller_settings())
        .build()
}

/// Build the IamRole controller future
///
/// ServiceAccounts created by the operator are watched too, so changes to
/// them queue a pass over the owning IamRole. That pass only reacts to the
/// IamRole's own status; it does not recreate a ServiceAccount deleted by hand.
pub fn build_role_controller(client: Client, ctx: Arc<Context>) -> impl Future<Output = ()> + Send {
    let roles: Api<IamRole> = Api::all(client.clone());
    let service_accounts: Api<ServiceAccount> = Api::all(client);
    let managed = format!("{}={}", LABEL_MANAGED_BY, LABEL_MANAGED_BY_IRSA);

    tracing::info!("- IamRole controller");

    Controller::new(roles, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .owns(
            service_accounts,
            WatcherConfig::default()
                .timeout(WATCH_TIMEOUT_SECS)
                .labels(&managed),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("IamRole"))
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
