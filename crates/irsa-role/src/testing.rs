//! In-memory object store for controller tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use irsa_common::crd::{IamRole, IamRoleSpec, IamRoleStatus};
use irsa_common::{Error, ROLE_FINALIZER};
use irsa_iam::testing::Journal;

use crate::store::RoleStore;

/// Holds a single IamRole the way the API server would
///
/// Every write bumps the resourceVersion; status writes carrying an older
/// resourceVersion fail with a conflict. Removing the last finalizer of a
/// deleting object removes the object.
pub struct FakeRoleStore {
    journal: Journal,
    role: Mutex<Option<IamRole>>,
    service_accounts: Mutex<BTreeMap<String, ServiceAccount>>,
    patch_failure: Mutex<Option<Error>>,
    bump_on_get: AtomicBool,
    gets: AtomicUsize,
}

impl FakeRoleStore {
    pub fn new(mut role: IamRole, journal: Journal) -> Self {
        role.metadata.resource_version = Some("1".to_string());
        Self {
            journal,
            role: Mutex::new(Some(role)),
            service_accounts: Mutex::new(BTreeMap::new()),
            patch_failure: Mutex::new(None),
            bump_on_get: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
        }
    }

    /// Snapshot of the stored object, as the controller cache would hand it out
    pub fn current(&self) -> Option<IamRole> {
        self.role.lock().unwrap().clone()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn service_account(&self, name: &str) -> Option<ServiceAccount> {
        self.service_accounts.lock().unwrap().get(name).cloned()
    }

    /// Overwrite the status as an earlier pass would have left it
    pub fn set_status(&self, status: IamRoleStatus) {
        self.modify(|role| role.status = Some(status));
    }

    pub fn update_spec(&self, f: impl FnOnce(&mut IamRoleSpec)) {
        self.modify(|role| f(&mut role.spec));
    }

    pub fn add_finalizer_directly(&self) {
        self.modify(|role| role.finalizers_mut().push(ROLE_FINALIZER.to_string()));
    }

    /// Simulate `kubectl delete` on an object
    pub fn mark_deleting(&self) {
        self.modify(|role| role.metadata.deletion_timestamp = Some(Time(Default::default())));
    }

    /// Fail the next status write with `error`
    pub fn fail_next_patch(&self, error: Error) {
        *self.patch_failure.lock().unwrap() = Some(error);
    }

    /// Simulate another writer updating the object right after the next read
    pub fn bump_resource_version_on_next_get(&self) {
        self.bump_on_get.store(true, Ordering::SeqCst);
    }

    fn modify(&self, f: impl FnOnce(&mut IamRole)) {
        let mut guard = self.role.lock().unwrap();
        let role = guard.as_mut().expect("role exists");
        f(role);
        bump(role);
    }
}

fn bump(role: &mut IamRole) {
    let next = role
        .resource_version()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    role.metadata.resource_version = Some(next.to_string());
}

#[async_trait]
impl RoleStore for FakeRoleStore {
    async fn get(&self, _namespace: &str, _name: &str) -> Result<Option<IamRole>, Error> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.role.lock().unwrap();
        let snapshot = guard.clone();
        if self.bump_on_get.swap(false, Ordering::SeqCst) {
            if let Some(role) = guard.as_mut() {
                bump(role);
            }
        }
        Ok(snapshot)
    }

    async fn add_finalizer(
        &self,
        _namespace: &str,
        _name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.journal.record("k8s:AddFinalizer");
        let mut guard = self.role.lock().unwrap();
        let role = guard.as_mut().ok_or_else(|| Error::internal("not found"))?;
        if !role.finalizers().iter().any(|f| f == finalizer) {
            role.finalizers_mut().push(finalizer.to_string());
            bump(role);
        }
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        _namespace: &str,
        _name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.journal.record("k8s:RemoveFinalizer");
        let mut guard = self.role.lock().unwrap();
        let Some(role) = guard.as_mut() else {
            return Ok(());
        };
        role.finalizers_mut().retain(|f| f != finalizer);
        bump(role);
        if role.is_deleting() && role.finalizers().is_empty() {
            *guard = None;
        }
        Ok(())
    }

    async fn patch_status(&self, role: &IamRole, status: &IamRoleStatus) -> Result<(), Error> {
        self.journal.record("k8s:PatchStatus");
        if let Some(err) = self.patch_failure.lock().unwrap().take() {
            return Err(err);
        }
        let mut guard = self.role.lock().unwrap();
        let stored = guard.as_mut().ok_or_else(|| Error::internal("not found"))?;
        if stored.resource_version() != role.resource_version() {
            return Err(Error::conflict(
                role.resource_key(),
                "the object has been modified; please apply your changes to the latest version",
            ));
        }
        stored.status = Some(status.clone());
        bump(stored);
        Ok(())
    }

    async fn apply_service_account(&self, service_account: &ServiceAccount) -> Result<(), Error> {
        self.journal.record("k8s:ApplyServiceAccount");
        self.service_accounts
            .lock()
            .unwrap()
            .insert(service_account.name_any(), service_account.clone());
        Ok(())
    }
}
