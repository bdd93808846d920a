use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use domain_snapshot::{model::vo::EngineEvent, service::EventLog};
use tokio::io::AsyncWriteExt;
use typed_builder::TypedBuilder;

/// Appends one JSON record per line.
#[derive(Debug, TypedBuilder)]
pub struct JsonLinesEventLog {
    #[builder(setter(into))]
    path: PathBuf,
    #[builder(default, setter(skip))]
    write_lock: tokio::sync::Mutex<()>,
}

#[async_trait]
impl EventLog for JsonLinesEventLog {
    async fn append(&self, event: &EngineEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open event log {:?}", self.path))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps events in memory, for inspection.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<EngineEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: &EngineEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
        Ok(())
    }
}
