use async_trait::async_trait;

use crate::exception::EngineException;
use crate::model::{
    entity::Account,
    vo::{EffectivePolicy, RetentionPolicy},
};

/// Read-only view of the configuration store.
#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Option<Account>>;
    async fn list(&self) -> anyhow::Result<Vec<Account>>;
    /// Global default retention policy.
    async fn global_retention(&self) -> anyhow::Result<RetentionPolicy>;

    async fn get_required(&self, name: &str) -> anyhow::Result<Account> {
        self.get(name).await?.ok_or_else(|| {
            EngineException::UnknownAccount {
                name: name.to_owned(),
            }
            .into()
        })
    }

    /// Quota and retention in force for `name`, account override first.
    async fn effective_policy(&self, name: &str) -> anyhow::Result<EffectivePolicy> {
        let account = self.get_required(name).await?;
        let global = self.global_retention().await?;
        Ok(EffectivePolicy {
            quota_bytes: account.quota_bytes,
            retention: RetentionPolicy::resolve(account.retention.as_ref(), &global),
        })
    }
}
