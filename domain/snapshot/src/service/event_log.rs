use async_trait::async_trait;

use crate::model::vo::EngineEvent;

/// Append-only sink for engine decisions.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: &EngineEvent) -> anyhow::Result<()>;
}
