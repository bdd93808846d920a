use async_trait::async_trait;

use crate::model::entity::InProgressMarker;

/// Lightly persisted in-progress markers, consulted on restart.
#[async_trait]
pub trait MarkerRepo: Send + Sync {
    async fn save(&self, account: &str, marker: &InProgressMarker) -> anyhow::Result<()>;
    /// Removing an absent marker is not an error.
    async fn remove(&self, account: &str) -> anyhow::Result<()>;
    async fn load_all(&self) -> anyhow::Result<Vec<(String, InProgressMarker)>>;
}
