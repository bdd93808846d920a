use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use domain_snapshot::{model::entity::InProgressMarker, repository::MarkerRepo};
use typed_builder::TypedBuilder;

const MARKER_EXTENSION: &str = "marker";

/// One JSON file per account under `dir`, written via rename so readers never see half a marker.
#[derive(Debug, TypedBuilder)]
pub struct FileMarkerRepo {
    #[builder(setter(into))]
    dir: PathBuf,
}

impl FileMarkerRepo {
    fn path(&self, account: &str) -> PathBuf {
        self.dir.join(format!("{account}.{MARKER_EXTENSION}"))
    }
}

#[async_trait]
impl MarkerRepo for FileMarkerRepo {
    async fn save(&self, account: &str, marker: &InProgressMarker) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create marker directory {:?}", self.dir))?;
        let path = self.path(account);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(marker)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, account: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.path(account)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn load_all(&self) -> anyhow::Result<Vec<(String, InProgressMarker)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(x) => x,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut markers = vec![];
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Unable to list markers in {:?}: {e}", self.dir);
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MARKER_EXTENSION) {
                continue;
            }
            let Some(account) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned)
            else {
                continue;
            };
            let content = match tokio::fs::read(&path).await {
                Ok(x) => x,
                Err(e) => {
                    tracing::error!(account = %account, "Skipping marker {path:?}: {e}");
                    continue;
                }
            };
            match serde_json::from_slice::<InProgressMarker>(&content) {
                Ok(marker) => markers.push((account, marker)),
                Err(e) => {
                    tracing::warn!(account = %account, "Removing unreadable marker {path:?}: {e}");
                    if let Err(e) = self.remove(&account).await {
                        tracing::error!(account = %account, "Unable to remove marker {path:?}: {e:#}");
                    }
                }
            }
        }
        Ok(markers)
    }
}

/// Markers that live only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryMarkerRepo {
    markers: DashMap<String, InProgressMarker>,
}

impl MemoryMarkerRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarkerRepo for MemoryMarkerRepo {
    async fn save(&self, account: &str, marker: &InProgressMarker) -> anyhow::Result<()> {
        self.markers.insert(account.to_owned(), marker.clone());
        Ok(())
    }

    async fn remove(&self, account: &str) -> anyhow::Result<()> {
        self.markers.remove(account);
        Ok(())
    }

    async fn load_all(&self) -> anyhow::Result<Vec<(String, InProgressMarker)>> {
        Ok(self.markers.iter().map(|e| (e.key().clone(), e.value().clone())).collect())
    }
}
