use async_trait::async_trait;
use domain_snapshot::{
    model::{entity::Account, vo::RetentionPolicy},
    repository::AccountRepo,
};
use typed_builder::TypedBuilder;

/// Accounts fixed at startup from the configuration file.
#[derive(Debug, Clone, TypedBuilder)]
pub struct StaticAccountRepo {
    #[builder(default)]
    accounts: Vec<Account>,
    #[builder(default)]
    global_retention: RetentionPolicy,
}

#[async_trait]
impl AccountRepo for StaticAccountRepo {
    async fn get(&self, name: &str) -> anyhow::Result<Option<Account>> {
        Ok(self.accounts.iter().find(|a| a.name == name).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<Account>> {
        Ok(self.accounts.clone())
    }

    async fn global_retention(&self) -> anyhow::Result<RetentionPolicy> {
        Ok(self.global_retention)
    }
}
