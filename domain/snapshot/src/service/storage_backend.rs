use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::model::entity::Snapshot;

/// Copy-on-write storage the engine snapshots into.
///
/// Implementations own every detail of the underlying technology, including
/// clearing immutability before a delete.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create an independent point-in-time copy of `src` at `dst`.
    ///
    /// Fails with `EngineException::SnapshotExists` if `dst` is taken.
    /// The copy is writable until sealed with `set_read_only`.
    async fn snapshot(&self, src: &Path, dst: &Path) -> anyhow::Result<()>;
    async fn set_read_only(&self, path: &Path, read_only: bool) -> anyhow::Result<()>;
    /// Space consumed by the subtree, counting shared extents once where the backend can tell.
    async fn usage_bytes(&self, path: &Path) -> anyhow::Result<u64>;
    /// Files under `path` currently open for writing by any process, relative to `path`.
    async fn list_open_writers(&self, path: &Path) -> anyhow::Result<Vec<PathBuf>>;
    /// Irreversibly remove a snapshot, sealed or not.
    async fn delete(&self, path: &Path) -> anyhow::Result<()>;
    /// Flush pending writes under `path` to durable storage.
    async fn flush(&self, path: &Path) -> anyhow::Result<()>;
    async fn is_empty(&self, path: &Path) -> anyhow::Result<bool>;
    /// Remove one entry from an unsealed snapshot. Absent entries are ignored.
    async fn remove_entry(&self, path: &Path) -> anyhow::Result<()>;
    /// Sealed snapshots under `history`, oldest first. Unsealed copies are not listed.
    async fn list_snapshots(&self, history: &Path) -> anyhow::Result<Vec<Snapshot>>;
    /// Cheap reachability check for the health signal.
    async fn probe(&self) -> anyhow::Result<()>;
}
