//! In-memory IAM and STS for tests
//!
//! [`FakeIamClient`] keeps policies, versions, roles and attachments the way
//! IAM does, including its refusals (deleting an attached policy, a sixth
//! version, deleting the default version). Every call is appended to a
//! [`Journal`] that can be shared with other fakes so tests can assert the
//! order of calls across systems.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::account::AccountIdSource;
use crate::client::{IamClient, IamError, ManagedPolicy, PolicyVersion};
use crate::gateway::MAX_POLICY_VERSIONS;

/// Account id the fakes report
pub const FAKE_ACCOUNT_ID: &str = "123456789012";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered record of calls made against fakes
///
/// Entries are `<system>:<Operation>`, e.g. `iam:CreatePolicy` or
/// `k8s:PatchStatus`.
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    /// All entries in call order
    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Entries starting with `prefix`, in call order
    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<String> {
        lock(&self.0)
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of entries starting with `prefix`
    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        lock(&self.0).iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Forget all entries
    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

#[derive(Clone, Debug)]
struct FakeVersion {
    id: String,
    document: String,
    is_default: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct FakePolicy {
    name: String,
    versions: Vec<FakeVersion>,
    next_version: u32,
}

#[derive(Debug)]
struct FakeRole {
    trust_document: String,
    attached: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct State {
    policies: BTreeMap<String, FakePolicy>,
    roles: BTreeMap<String, FakeRole>,
    failures: HashMap<&'static str, VecDeque<IamError>>,
    ticks: i64,
}

impl State {
    fn now(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_700_000_000 + self.ticks)
    }

    fn policy(&mut self, operation: &'static str, arn: &str) -> Result<&mut FakePolicy, IamError> {
        self.policies.get_mut(arn).ok_or_else(|| IamError::NotFound {
            operation,
            message: format!("Policy {} does not exist", arn),
        })
    }

    fn attachment_count(&self, arn: &str) -> usize {
        self.roles.values().filter(|r| r.attached.contains(arn)).count()
    }
}

fn managed(arn: &str, policy: &FakePolicy) -> ManagedPolicy {
    ManagedPolicy {
        arn: arn.to_string(),
        name: policy.name.clone(),
        default_version_id: policy
            .versions
            .iter()
            .find(|v| v.is_default)
            .map(|v| v.id.clone()),
    }
}

fn version(v: &FakeVersion) -> PolicyVersion {
    PolicyVersion {
        version_id: v.id.clone(),
        is_default: v.is_default,
        created_at: Some(v.created_at),
    }
}

fn delete_conflict(operation: &'static str, message: String) -> IamError {
    IamError::Service {
        operation,
        code: "DeleteConflict".to_string(),
        message,
        retryable: true,
    }
}

/// Stateful in-memory IAM
pub struct FakeIamClient {
    journal: Journal,
    partition: String,
    account_id: String,
    state: Mutex<State>,
}

impl FakeIamClient {
    /// Fake IAM in the `aws` partition and [`FAKE_ACCOUNT_ID`]
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            partition: "aws".to_string(),
            account_id: FAKE_ACCOUNT_ID.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Make the next call to `operation` fail with `error`
    ///
    /// Queued failures are consumed in order, one per call.
    pub fn fail_next(&self, operation: &'static str, error: IamError) {
        lock(&self.state)
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Names of all existing policies
    pub fn policy_names(&self) -> Vec<String> {
        lock(&self.state)
            .policies
            .values()
            .map(|p| p.name.clone())
            .collect()
    }

    /// ARN of the policy with the given name
    pub fn policy_arn(&self, name: &str) -> Option<String> {
        lock(&self.state)
            .policies
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(arn, _)| arn.clone())
    }

    /// Document of the default version of a policy
    pub fn default_document(&self, arn: &str) -> Option<String> {
        lock(&self.state)
            .policies
            .get(arn)?
            .versions
            .iter()
            .find(|v| v.is_default)
            .map(|v| v.document.clone())
    }

    /// Version ids of a policy in creation order
    pub fn version_ids(&self, arn: &str) -> Vec<String> {
        lock(&self.state)
            .policies
            .get(arn)
            .map(|p| p.versions.iter().map(|v| v.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether a role exists
    pub fn has_role(&self, name: &str) -> bool {
        lock(&self.state).roles.contains_key(name)
    }

    /// Trust policy of a role
    pub fn trust_document(&self, name: &str) -> Option<String> {
        lock(&self.state)
            .roles
            .get(name)
            .map(|r| r.trust_document.clone())
    }

    /// Policies attached to a role
    pub fn attached_policies(&self, role_name: &str) -> Vec<String> {
        lock(&self.state)
            .roles
            .get(role_name)
            .map(|r| r.attached.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn begin(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, IamError> {
        self.journal.record(format!("iam:{}", operation));
        let mut state = lock(&self.state);
        let injected = state
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl IamClient for FakeIamClient {
    async fn create_policy(&self, name: &str, document: &str) -> Result<ManagedPolicy, IamError> {
        const OP: &str = "CreatePolicy";
        let mut state = self.begin(OP)?;
        let arn = format!("arn:{}:iam::{}:policy/{}", self.partition, self.account_id, name);
        if state.policies.contains_key(&arn) {
            return Err(IamError::AlreadyExists {
                operation: OP,
                message: format!("A policy called {} already exists", name),
            });
        }
        let created_at = state.now();
        let policy = FakePolicy {
            name: name.to_string(),
            versions: vec![FakeVersion {
                id: "v1".to_string(),
                document: document.to_string(),
                is_default: true,
                created_at,
            }],
            next_version: 2,
        };
        let result = managed(&arn, &policy);
        state.policies.insert(arn, policy);
        Ok(result)
    }

    async fn get_policy(&self, arn: &str) -> Result<ManagedPolicy, IamError> {
        let mut state = self.begin("GetPolicy")?;
        let policy = state.policy("GetPolicy", arn)?;
        Ok(managed(arn, policy))
    }

    async fn delete_policy(&self, arn: &str) -> Result<(), IamError> {
        const OP: &str = "DeletePolicy";
        let mut state = self.begin(OP)?;
        if state.attachment_count(arn) > 0 {
            return Err(delete_conflict(
                OP,
                "Cannot delete a policy attached to entities".to_string(),
            ));
        }
        let policy = state.policy(OP, arn)?;
        if policy.versions.len() > 1 {
            return Err(delete_conflict(
                OP,
                "This policy has more than one version".to_string(),
            ));
        }
        state.policies.remove(arn);
        Ok(())
    }

    async fn list_policy_versions(&self, arn: &str) -> Result<Vec<PolicyVersion>, IamError> {
        const OP: &str = "ListPolicyVersions";
        let mut state = self.begin(OP)?;
        let policy = state.policy(OP, arn)?;
        // IAM lists newest first
        Ok(policy.versions.iter().rev().map(version).collect())
    }

    async fn create_policy_version(
        &self,
        arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<PolicyVersion, IamError> {
        const OP: &str = "CreatePolicyVersion";
        let mut state = self.begin(OP)?;
        let created_at = state.now();
        let policy = state.policy(OP, arn)?;
        if policy.versions.len() >= MAX_POLICY_VERSIONS {
            return Err(IamError::Service {
                operation: OP,
                code: "LimitExceeded".to_string(),
                message: format!(
                    "A managed policy can have up to {} versions",
                    MAX_POLICY_VERSIONS
                ),
                retryable: false,
            });
        }
        if set_as_default {
            for v in policy.versions.iter_mut() {
                v.is_default = false;
            }
        }
        let new = FakeVersion {
            id: format!("v{}", policy.next_version),
            document: document.to_string(),
            is_default: set_as_default,
            created_at,
        };
        policy.next_version += 1;
        let result = version(&new);
        policy.versions.push(new);
        Ok(result)
    }

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<(), IamError> {
        const OP: &str = "DeletePolicyVersion";
        let mut state = self.begin(OP)?;
        let policy = state.policy(OP, arn)?;
        let index = policy
            .versions
            .iter()
            .position(|v| v.id == version_id)
            .ok_or_else(|| IamError::NotFound {
                operation: OP,
                message: format!("Policy version {} does not exist", version_id),
            })?;
        if policy.versions[index].is_default {
            return Err(delete_conflict(
                OP,
                "Cannot delete the default version of a policy".to_string(),
            ));
        }
        policy.versions.remove(index);
        Ok(())
    }

    async fn create_role(
        &self,
        name: &str,
        trust_document: &str,
        _description: &str,
    ) -> Result<(), IamError> {
        const OP: &str = "CreateRole";
        let mut state = self.begin(OP)?;
        if state.roles.contains_key(name) {
            return Err(IamError::AlreadyExists {
                operation: OP,
                message: format!("Role with name {} already exists", name),
            });
        }
        state.roles.insert(
            name.to_string(),
            FakeRole {
                trust_document: trust_document.to_string(),
                attached: BTreeSet::new(),
            },
        );
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<(), IamError> {
        const OP: &str = "DeleteRole";
        let mut state = self.begin(OP)?;
        let role = state.roles.get(name).ok_or_else(|| IamError::NotFound {
            operation: OP,
            message: format!("The role with name {} cannot be found", name),
        })?;
        if !role.attached.is_empty() {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must detach all policies first".to_string(),
            ));
        }
        state.roles.remove(name);
        Ok(())
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), IamError> {
        const OP: &str = "AttachRolePolicy";
        let mut state = self.begin(OP)?;
        state.policy(OP, policy_arn)?;
        let role = state.roles.get_mut(role_name).ok_or_else(|| IamError::NotFound {
            operation: OP,
            message: format!("The role with name {} cannot be found", role_name),
        })?;
        role.attached.insert(policy_arn.to_string());
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), IamError> {
        const OP: &str = "DetachRolePolicy";
        let mut state = self.begin(OP)?;
        let detached = state
            .roles
            .get_mut(role_name)
            .map(|r| r.attached.remove(policy_arn))
            .unwrap_or(false);
        if !detached {
            return Err(IamError::NotFound {
                operation: OP,
                message: format!("Policy {} was not found on role {}", policy_arn, role_name),
            });
        }
        Ok(())
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>, IamError> {
        const OP: &str = "ListAttachedRolePolicies";
        let state = self.begin(OP)?;
        let role = state.roles.get(role_name).ok_or_else(|| IamError::NotFound {
            operation: OP,
            message: format!("The role with name {} cannot be found", role_name),
        })?;
        Ok(role.attached.iter().cloned().collect())
    }
}

/// Account id source with a fixed answer that counts lookups
pub struct StaticAccountSource {
    account_id: String,
    journal: Journal,
    calls: AtomicUsize,
}

impl StaticAccountSource {
    /// Source answering [`FAKE_ACCOUNT_ID`]
    pub fn new(journal: Journal) -> Self {
        Self::with_account_id(FAKE_ACCOUNT_ID, journal)
    }

    /// Source answering `account_id`
    pub fn with_account_id(account_id: impl Into<String>, journal: Journal) -> Self {
        Self {
            account_id: account_id.into(),
            journal,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of lookups so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountIdSource for StaticAccountSource {
    async fn account_id(&self) -> irsa_common::Result<String> {
        self.journal.record("sts:GetCallerIdentity");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.account_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_refuses_what_iam_refuses() {
        let journal = Journal::new();
        let iam = FakeIamClient::new(journal.clone());

        let policy = iam.create_policy("reader", "{}").await.expect("create");
        iam.create_role("reader", "{}", "").await.expect("role");
        iam.attach_role_policy("reader", &policy.arn).await.expect("attach");

        assert!(iam.create_policy("reader", "{}").await.unwrap_err().is_already_exists());
        assert!(matches!(
            iam.delete_policy(&policy.arn).await.unwrap_err(),
            IamError::Service { ref code, .. } if code == "DeleteConflict"
        ));
        assert!(matches!(
            iam.delete_role("reader").await.unwrap_err(),
            IamError::Service { ref code, .. } if code == "DeleteConflict"
        ));
        assert!(matches!(
            iam.delete_policy_version(&policy.arn, "v1").await.unwrap_err(),
            IamError::Service { ref code, .. } if code == "DeleteConflict"
        ));

        for _ in 0..4 {
            iam.create_policy_version(&policy.arn, "{}", true).await.expect("version");
        }
        assert!(matches!(
            iam.create_policy_version(&policy.arn, "{}", true).await.unwrap_err(),
            IamError::Service { ref code, .. } if code == "LimitExceeded"
        ));
        assert_eq!(iam.version_ids(&policy.arn), vec!["v1", "v2", "v3", "v4", "v5"]);
        assert_eq!(journal.count_with_prefix("iam:CreatePolicyVersion"), 5);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let iam = FakeIamClient::new(Journal::new());
        iam.fail_next(
            "CreateRole",
            IamError::Throttled {
                operation: "CreateRole",
                message: "Rate exceeded".to_string(),
            },
        );
        assert!(iam.create_role("r", "{}", "").await.is_err());
        assert!(!iam.has_role("r"));
        iam.create_role("r", "{}", "").await.expect("second attempt");
        assert!(iam.has_role("r"));
    }
}
