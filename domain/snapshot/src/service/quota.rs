use async_trait::async_trait;

use crate::model::{entity::Account, vo::Admission};

/// The only backpressure in the engine: gates snapshots on usage against the limit.
#[async_trait]
pub trait QuotaAdmissionService: Send + Sync {
    async fn admit(&self, account: &Account) -> anyhow::Result<Admission>;
}
