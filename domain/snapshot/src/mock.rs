use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mockall::mock;

use crate::{
    model::{
        entity::{Account, InProgressMarker, Snapshot},
        vo::{EngineEvent, RetentionPolicy},
    },
    repository::{AccountRepo, MarkerRepo},
    service::{EventLog, StorageBackend},
};

mock! {
    pub StorageBackend {}
    #[async_trait]
    impl StorageBackend for StorageBackend {
        async fn snapshot(&self, src: &Path, dst: &Path) -> anyhow::Result<()>;
        async fn set_read_only(&self, path: &Path, read_only: bool) -> anyhow::Result<()>;
        async fn usage_bytes(&self, path: &Path) -> anyhow::Result<u64>;
        async fn list_open_writers(&self, path: &Path) -> anyhow::Result<Vec<PathBuf>>;
        async fn delete(&self, path: &Path) -> anyhow::Result<()>;
        async fn flush(&self, path: &Path) -> anyhow::Result<()>;
        async fn is_empty(&self, path: &Path) -> anyhow::Result<bool>;
        async fn remove_entry(&self, path: &Path) -> anyhow::Result<()>;
        async fn list_snapshots(&self, history: &Path) -> anyhow::Result<Vec<Snapshot>>;
        async fn probe(&self) -> anyhow::Result<()>;
    }
}

mock! {
    pub AccountRepo {}
    #[async_trait]
    impl AccountRepo for AccountRepo {
        async fn get(&self, name: &str) -> anyhow::Result<Option<Account>>;
        async fn list(&self) -> anyhow::Result<Vec<Account>>;
        async fn global_retention(&self) -> anyhow::Result<RetentionPolicy>;
    }
}

mock! {
    pub MarkerRepo {}
    #[async_trait]
    impl MarkerRepo for MarkerRepo {
        async fn save(&self, account: &str, marker: &InProgressMarker) -> anyhow::Result<()>;
        async fn remove(&self, account: &str) -> anyhow::Result<()>;
        async fn load_all(&self) -> anyhow::Result<Vec<(String, InProgressMarker)>>;
    }
}

mock! {
    pub EventLog {}
    #[async_trait]
    impl EventLog for EventLog {
        async fn append(&self, event: &EngineEvent) -> anyhow::Result<()>;
    }
}
