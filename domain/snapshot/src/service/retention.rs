use async_trait::async_trait;
use serde::Serialize;

use crate::model::{entity::Account, vo::SnapshotId};

/// What one account's sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub retained: Vec<SnapshotId>,
    pub deleted: Vec<SnapshotId>,
    pub failed: Vec<SnapshotId>,
}

/// Prunes sealed snapshots down to what the policy requires.
#[async_trait]
pub trait RetentionService: Send + Sync {
    async fn sweep_account(&self, account: &Account) -> anyhow::Result<RetentionReport>;
    /// Sweep every configured account in turn. One account failing does not stop the rest.
    async fn sweep_all(&self) -> anyhow::Result<Vec<(String, RetentionReport)>>;
}
