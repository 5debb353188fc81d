//! Account id resolution
//!
//! The account a process runs in never changes, so the first successful
//! lookup is kept for the lifetime of the resolver. A failed lookup is not
//! cached and surfaces as a retryable error.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::info;

use irsa_common::{Error, Result};

#[cfg(test)]
use mockall::automock;

/// Source of the current AWS account id
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccountIdSource: Send + Sync {
    /// Look up the account id of the current credentials
    async fn account_id(&self) -> Result<String>;
}

/// Account id from STS `GetCallerIdentity`
pub struct StsAccountSource {
    client: aws_sdk_sts::Client,
}

impl StsAccountSource {
    /// Wrap an STS client
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccountIdSource for StsAccountSource {
    async fn account_id(&self) -> Result<String> {
        let out = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| {
                Error::cloud(
                    "GetCallerIdentity",
                    aws_sdk_sts::error::DisplayErrorContext(&e).to_string(),
                )
            })?;
        out.account()
            .map(str::to_string)
            .ok_or_else(|| {
                Error::cloud("GetCallerIdentity", "response did not include the account")
            })
    }
}

/// Memoizing account id resolver, shared by all reconciliations
pub struct AccountResolver {
    source: Arc<dyn AccountIdSource>,
    cached: OnceCell<String>,
}

impl AccountResolver {
    /// Create a resolver that asks `source` at most once successfully
    pub fn new(source: Arc<dyn AccountIdSource>) -> Self {
        Self {
            source,
            cached: OnceCell::new(),
        }
    }

    /// Resolver with a known account id (no lookups)
    pub fn with_account_id(
        account_id: impl Into<String>,
        source: Arc<dyn AccountIdSource>,
    ) -> Self {
        Self {
            source,
            cached: OnceCell::new_with(Some(account_id.into())),
        }
    }

    /// Account id, looked up on first use
    pub async fn account_id(&self) -> Result<&str> {
        let id = self
            .cached
            .get_or_try_init(|| async {
                let id = self.source.account_id().await?;
                info!(account_id = %id, "resolved AWS account");
                Ok::<_, Error>(id)
            })
            .await?;
        Ok(id.as_str())
    }

    #[cfg(test)]
    fn cached(&self) -> Option<&str> {
        self.cached.get().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_happens_once() {
        let mut source = MockAccountIdSource::new();
        source
            .expect_account_id()
            .times(1)
            .returning(|| Ok("123456789012".to_string()));
        let resolver = AccountResolver::new(Arc::new(source));

        assert_eq!(resolver.cached(), None);
        assert_eq!(resolver.account_id().await.expect("account"), "123456789012");
        assert_eq!(resolver.account_id().await.expect("account"), "123456789012");
        assert_eq!(resolver.cached(), Some("123456789012"));
    }

    #[tokio::test]
    async fn failures_are_retryable_and_not_cached() {
        let mut source = MockAccountIdSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_account_id()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(Error::cloud("GetCallerIdentity", "connection reset")));
        source
            .expect_account_id()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok("123456789012".to_string()));
        let resolver = AccountResolver::new(Arc::new(source));

        let err = resolver.account_id().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(resolver.cached(), None);

        assert_eq!(resolver.account_id().await.expect("account"), "123456789012");
    }

    #[tokio::test]
    async fn preset_account_skips_lookup() {
        let mut source = MockAccountIdSource::new();
        source.expect_account_id().never();
        let resolver = AccountResolver::with_account_id("210987654321", Arc::new(source));
        assert_eq!(resolver.account_id().await.expect("account"), "210987654321");
    }
}
