//! Idempotent IAM operations
//!
//! The engine may repeat a step whose effect landed in AWS but whose status
//! write did not. Every operation here therefore treats "already in the
//! target state" as success: creates adopt existing entities, deletes accept
//! missing ones.
//!
//! The gateway also owns the policy version cap. IAM keeps at most
//! [`MAX_POLICY_VERSIONS`] versions per managed policy, so pushing a new
//! document into a full policy first evicts the oldest non-default version.

use std::sync::Arc;

use tracing::{debug, info, warn};

use irsa_common::Result;

use crate::account::AccountResolver;
use crate::client::{IamClient, IamError, PolicyVersion};

/// Versions IAM retains per managed policy
pub const MAX_POLICY_VERSIONS: usize = 5;

/// A managed policy returned by [`IamGateway::create_policy`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyHandle {
    /// Policy ARN
    pub arn: String,
    /// `true` if this call created the policy, `false` if it already existed
    pub created: bool,
}

/// Pick the version to delete to make room for a new one
///
/// Only non-default versions are candidates. The oldest by creation time
/// wins, versions without a timestamp count as oldest, and ties fall back to
/// the numeric part of the version id.
pub fn select_version_to_evict(versions: &[PolicyVersion]) -> Option<&PolicyVersion> {
    versions
        .iter()
        .filter(|v| !v.is_default)
        .min_by_key(|v| (v.created_at, version_number(&v.version_id)))
}

fn version_number(version_id: &str) -> u64 {
    version_id
        .trim_start_matches('v')
        .parse()
        .unwrap_or(u64::MAX)
}

/// Swallow "no such entity" for deletes
fn tolerate_not_found(
    result: std::result::Result<(), IamError>,
) -> std::result::Result<bool, IamError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// IAM access with idempotent create/delete semantics
pub struct IamGateway {
    client: Arc<dyn IamClient>,
    accounts: Arc<AccountResolver>,
    partition: String,
}

impl IamGateway {
    /// Create a gateway
    ///
    /// # Arguments
    ///
    /// * `client` - raw IAM calls
    /// * `accounts` - account id used to compose ARNs
    /// * `partition` - ARN partition (`aws`, `aws-cn`, `aws-us-gov`)
    pub fn new(
        client: Arc<dyn IamClient>,
        accounts: Arc<AccountResolver>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            client,
            accounts,
            partition: partition.into(),
        }
    }

    /// ARN partition
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Memoized account id
    pub async fn account_id(&self) -> Result<&str> {
        self.accounts.account_id().await
    }

    /// ARN of a role in this account
    pub async fn role_arn(&self, role_name: &str) -> Result<String> {
        let account = self.account_id().await?;
        Ok(format!("arn:{}:iam::{}:role/{}", self.partition, account, role_name))
    }

    /// ARN of a customer managed policy in this account
    pub async fn policy_arn(&self, policy_name: &str) -> Result<String> {
        let account = self.account_id().await?;
        Ok(format!(
            "arn:{}:iam::{}:policy/{}",
            self.partition, account, policy_name
        ))
    }

    /// Create a managed policy, adopting one that already has this name
    ///
    /// An adopted policy may carry an older document; callers should not
    /// assume `document` is in effect unless [`PolicyHandle::created`] is set.
    pub async fn create_policy(&self, name: &str, document: &str) -> Result<PolicyHandle> {
        match self.client.create_policy(name, document).await {
            Ok(policy) => {
                info!(policy = %name, policy_arn = %policy.arn, "created IAM policy");
                Ok(PolicyHandle {
                    arn: policy.arn,
                    created: true,
                })
            }
            Err(e) if e.is_already_exists() => {
                let arn = self.policy_arn(name).await?;
                let existing = self.client.get_policy(&arn).await?;
                info!(policy = %name, policy_arn = %existing.arn, "adopted existing IAM policy");
                Ok(PolicyHandle {
                    arn: existing.arn,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Make `document` the default version of a policy
    ///
    /// Evicts the oldest non-default version first when the policy is full.
    pub async fn update_policy_document(
        &self,
        arn: &str,
        document: &str,
    ) -> Result<PolicyVersion> {
        let versions = self.client.list_policy_versions(arn).await?;
        if versions.len() >= MAX_POLICY_VERSIONS {
            if let Some(evict) = select_version_to_evict(&versions) {
                debug!(policy_arn = %arn, version = %evict.version_id, "evicting policy version");
                let evicted = self.client.delete_policy_version(arn, &evict.version_id).await;
                tolerate_not_found(evicted)?;
            }
        }

        let version = self
            .client
            .create_policy_version(arn, document, true)
            .await?;
        info!(policy_arn = %arn, version = %version.version_id, "pushed policy version");
        Ok(version)
    }

    /// Create a role, accepting one that already exists
    pub async fn create_role(
        &self,
        name: &str,
        trust_document: &str,
        description: &str,
    ) -> Result<()> {
        match self.client.create_role(name, trust_document, description).await {
            Ok(()) => {
                info!(role = %name, "created IAM role");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                info!(role = %name, "IAM role already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Attach a policy to a role (IAM treats repeats as success)
    pub async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.client.attach_role_policy(role_name, policy_arn).await?;
        info!(role = %role_name, policy_arn = %policy_arn, "attached policy to role");
        Ok(())
    }

    /// Detach a policy from a role, accepting one that is not attached
    pub async fn detach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        if tolerate_not_found(self.client.detach_role_policy(role_name, policy_arn).await)? {
            info!(role = %role_name, policy_arn = %policy_arn, "detached policy from role");
        }
        Ok(())
    }

    /// Delete a role, accepting one that does not exist
    ///
    /// A policy attached by a pass whose status write was lost still blocks
    /// the delete, so on `DeleteConflict` every attached policy is detached
    /// and the delete retried once.
    pub async fn delete_role(&self, name: &str) -> Result<()> {
        match self.client.delete_role(name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) if e.is_delete_conflict() => {
                self.detach_all_policies(name).await?;
                if !tolerate_not_found(self.client.delete_role(name).await)? {
                    return Ok(());
                }
            }
            Err(e) => return Err(e.into()),
        }
        info!(role = %name, "deleted IAM role");
        Ok(())
    }

    async fn detach_all_policies(&self, role_name: &str) -> Result<()> {
        let attached = match self.client.list_attached_role_policies(role_name).await {
            Ok(attached) => attached,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for policy_arn in attached {
            warn!(role = %role_name, policy_arn = %policy_arn, "detaching leftover policy");
            tolerate_not_found(self.client.detach_role_policy(role_name, &policy_arn).await)?;
        }
        Ok(())
    }

    /// Delete a policy and all its versions, accepting one that does not exist
    pub async fn delete_policy(&self, arn: &str) -> Result<()> {
        let versions = match self.client.list_policy_versions(arn).await {
            Ok(versions) => versions,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for version in versions.iter().filter(|v| !v.is_default) {
            tolerate_not_found(self.client.delete_policy_version(arn, &version.version_id).await)?;
        }

        if tolerate_not_found(self.client.delete_policy(arn).await)? {
            info!(policy_arn = %arn, "deleted IAM policy");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountIdSource;
    use crate::client::MockIamClient;
    use crate::testing::{FakeIamClient, Journal, StaticAccountSource, FAKE_ACCOUNT_ID};
    use chrono::{DateTime, Duration, Utc};

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs))
    }

    fn v(id: &str, is_default: bool, created_at: Option<DateTime<Utc>>) -> PolicyVersion {
        PolicyVersion {
            version_id: id.to_string(),
            is_default,
            created_at,
        }
    }

    fn resolver(journal: &Journal) -> Arc<AccountResolver> {
        let source: Arc<dyn AccountIdSource> = Arc::new(StaticAccountSource::new(journal.clone()));
        Arc::new(AccountResolver::new(source))
    }

    fn fake_gateway() -> (IamGateway, Arc<FakeIamClient>, Journal) {
        let journal = Journal::new();
        let fake = Arc::new(FakeIamClient::new(journal.clone()));
        let gateway = IamGateway::new(fake.clone(), resolver(&journal), "aws");
        (gateway, fake, journal)
    }

    fn not_found(operation: &'static str) -> IamError {
        IamError::NotFound {
            operation,
            message: "missing".to_string(),
        }
    }

    // =========================================================================
    // Version selection
    // =========================================================================

    #[test]
    fn default_version_is_never_evicted() {
        let versions = vec![
            v("v1", true, at(10)),
            v("v2", false, at(20)),
            v("v3", false, at(30)),
        ];
        assert_eq!(select_version_to_evict(&versions).map(|v| v.version_id.as_str()), Some("v2"));

        let only_default = vec![v("v7", true, at(10))];
        assert!(select_version_to_evict(&only_default).is_none());
    }

    #[test]
    fn oldest_by_creation_time_wins_regardless_of_listing_order() {
        let versions = vec![
            v("v9", true, at(90)),
            v("v8", false, at(80)),
            v("v6", false, at(60)),
            v("v7", false, at(70)),
            v("v5", false, at(50)),
        ];
        assert_eq!(select_version_to_evict(&versions).map(|v| v.version_id.as_str()), Some("v5"));
    }

    #[test]
    fn missing_timestamps_fall_back_to_version_number() {
        let versions = vec![
            v("v12", false, None),
            v("v10", false, None),
            v("v11", true, None),
            v("v13", false, at(5)),
        ];
        assert_eq!(select_version_to_evict(&versions).map(|v| v.version_id.as_str()), Some("v10"));
    }

    // =========================================================================
    // Version cap
    // =========================================================================

    /// Story: the sixth document evicts exactly one old version first
    #[tokio::test]
    async fn story_full_policy_evicts_oldest_non_default_before_push() {
        let mut client = MockIamClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_list_policy_versions()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(vec![
                    v("v5", true, at(50)),
                    v("v4", false, at(40)),
                    v("v3", false, at(30)),
                    v("v2", false, at(20)),
                    v("v1", false, at(10)),
                ])
            });
        client
            .expect_delete_policy_version()
            .withf(|_, id| id == "v1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        client
            .expect_create_policy_version()
            .withf(|_, doc, default| doc == "{\"new\":true}" && *default)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(v("v6", true, at(60))));

        let journal = Journal::new();
        let gateway = IamGateway::new(Arc::new(client), resolver(&journal), "aws");
        let version = gateway
            .update_policy_document("arn:aws:iam::123456789012:policy/p", "{\"new\":true}")
            .await
            .expect("update");
        assert_eq!(version.version_id, "v6");
    }

    #[tokio::test]
    async fn policy_with_room_gets_no_eviction() {
        let mut client = MockIamClient::new();
        client
            .expect_list_policy_versions()
            .returning(|_| Ok(vec![v("v2", true, at(20)), v("v1", false, at(10))]));
        client.expect_delete_policy_version().never();
        client
            .expect_create_policy_version()
            .times(1)
            .returning(|_, _, _| Ok(v("v3", true, at(30))));

        let journal = Journal::new();
        let gateway = IamGateway::new(Arc::new(client), resolver(&journal), "aws");
        gateway
            .update_policy_document("arn:aws:iam::123456789012:policy/p", "{}")
            .await
            .expect("update");
    }

    #[tokio::test]
    async fn repeated_updates_stay_under_the_cap() {
        let (gateway, fake, _) = fake_gateway();
        let handle = gateway.create_policy("p", "{\"v\":0}").await.expect("create");

        for i in 1..=12 {
            gateway
                .update_policy_document(&handle.arn, &format!("{{\"v\":{}}}", i))
                .await
                .expect("update");
            assert!(fake.version_ids(&handle.arn).len() <= MAX_POLICY_VERSIONS);
        }
        assert_eq!(fake.default_document(&handle.arn).as_deref(), Some("{\"v\":12}"));
        assert_eq!(
            fake.version_ids(&handle.arn),
            vec!["v9", "v10", "v11", "v12", "v13"]
        );
    }

    // =========================================================================
    // Idempotent creates
    // =========================================================================

    #[tokio::test]
    async fn create_policy_adopts_existing_policy() {
        let (gateway, fake, journal) = fake_gateway();
        let first = gateway.create_policy("p", "{}").await.expect("create");
        assert!(first.created);

        let second = gateway.create_policy("p", "{\"changed\":1}").await.expect("adopt");
        assert!(!second.created);
        assert_eq!(second.arn, first.arn);
        assert_eq!(
            second.arn,
            format!("arn:aws:iam::{}:policy/p", FAKE_ACCOUNT_ID)
        );
        assert_eq!(fake.policy_names(), vec!["p".to_string()]);
        assert_eq!(
            journal.entries_with_prefix("iam:"),
            vec!["iam:CreatePolicy", "iam:CreatePolicy", "iam:GetPolicy"]
        );
    }

    #[tokio::test]
    async fn create_role_accepts_existing_role() {
        let (gateway, fake, _) = fake_gateway();
        gateway.create_role("r", "{}", "").await.expect("create");
        gateway.create_role("r", "{}", "").await.expect("repeat");
        assert!(fake.has_role("r"));
    }

    #[tokio::test]
    async fn create_failures_propagate_with_classification() {
        let mut client = MockIamClient::new();
        client.expect_create_policy().returning(|_, _| {
            Err(IamError::Service {
                operation: "CreatePolicy",
                code: "MalformedPolicyDocument".to_string(),
                message: "bad".to_string(),
                retryable: false,
            })
        });
        client.expect_get_policy().never();

        let journal = Journal::new();
        let gateway = IamGateway::new(Arc::new(client), resolver(&journal), "aws");
        let err = gateway.create_policy("p", "{").await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.context(), Some("CreatePolicy"));
    }

    // =========================================================================
    // Idempotent deletes
    // =========================================================================

    #[tokio::test]
    async fn delete_policy_removes_old_versions_first() {
        let (gateway, fake, journal) = fake_gateway();
        let handle = gateway.create_policy("p", "{\"v\":1}").await.expect("create");
        gateway.update_policy_document(&handle.arn, "{\"v\":2}").await.expect("v2");
        gateway.update_policy_document(&handle.arn, "{\"v\":3}").await.expect("v3");
        journal.clear();

        gateway.delete_policy(&handle.arn).await.expect("delete");
        assert!(fake.policy_names().is_empty());
        assert_eq!(
            journal.entries(),
            vec![
                "iam:ListPolicyVersions",
                "iam:DeletePolicyVersion",
                "iam:DeletePolicyVersion",
                "iam:DeletePolicy",
            ]
        );
    }

    #[tokio::test]
    async fn deletes_accept_missing_entities() {
        let (gateway, _, _) = fake_gateway();
        gateway.delete_role("gone").await.expect("role");
        gateway
            .delete_policy("arn:aws:iam::123456789012:policy/gone")
            .await
            .expect("policy");
        gateway
            .detach_policy("gone", "arn:aws:iam::123456789012:policy/gone")
            .await
            .expect("detach");
    }

    #[tokio::test]
    async fn delete_policy_tolerates_concurrent_removal() {
        let mut client = MockIamClient::new();
        client
            .expect_list_policy_versions()
            .returning(|_| Ok(vec![v("v2", true, at(20)), v("v1", false, at(10))]));
        client
            .expect_delete_policy_version()
            .returning(|_, _| Err(not_found("DeletePolicyVersion")));
        client
            .expect_delete_policy()
            .returning(|_| Err(not_found("DeletePolicy")));

        let journal = Journal::new();
        let gateway = IamGateway::new(Arc::new(client), resolver(&journal), "aws");
        gateway
            .delete_policy("arn:aws:iam::123456789012:policy/p")
            .await
            .expect("delete");
    }

    #[tokio::test]
    async fn delete_role_detaches_leftover_policies() {
        let (gateway, fake, journal) = fake_gateway();
        let handle = gateway.create_policy("p", "{}").await.expect("policy");
        gateway.create_role("r", "{}", "").await.expect("role");
        gateway.attach_policy("r", &handle.arn).await.expect("attach");
        journal.clear();

        gateway.delete_role("r").await.expect("delete");
        assert!(!fake.has_role("r"));
        assert_eq!(
            journal.entries(),
            vec![
                "iam:DeleteRole",
                "iam:ListAttachedRolePolicies",
                "iam:DetachRolePolicy",
                "iam:DeleteRole",
            ]
        );
        // the policy itself is left for delete_policy
        assert_eq!(fake.policy_names(), vec!["p".to_string()]);
    }

    #[tokio::test]
    async fn delete_role_surfaces_a_persistent_conflict() {
        let conflict = || IamError::Service {
            operation: "DeleteRole",
            code: "DeleteConflict".to_string(),
            message: "Cannot delete entity, must delete policies first".to_string(),
            retryable: true,
        };
        let mut client = MockIamClient::new();
        client
            .expect_delete_role()
            .times(2)
            .returning(move |_| Err(conflict()));
        client
            .expect_list_attached_role_policies()
            .times(1)
            .returning(|_| Ok(vec![]));
        client.expect_detach_role_policy().never();

        let journal = Journal::new();
        let gateway = IamGateway::new(Arc::new(client), resolver(&journal), "aws");
        let err = gateway.delete_role("r").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.context(), Some("DeleteRole"));
    }

    // =========================================================================
    // ARNs
    // =========================================================================

    #[tokio::test]
    async fn arns_use_partition_and_cached_account() {
        let journal = Journal::new();
        let source = Arc::new(StaticAccountSource::with_account_id(
            "555555555555",
            journal.clone(),
        ));
        let accounts = Arc::new(AccountResolver::new(source.clone()));
        let gateway = IamGateway::new(
            Arc::new(FakeIamClient::new(journal.clone())),
            accounts,
            "aws-cn",
        );

        assert_eq!(
            gateway.role_arn("r").await.expect("arn"),
            "arn:aws-cn:iam::555555555555:role/r"
        );
        assert_eq!(
            gateway.policy_arn("p").await.expect("arn"),
            "arn:aws-cn:iam::555555555555:policy/p"
        );
        assert_eq!(source.calls(), 1);
    }
}
