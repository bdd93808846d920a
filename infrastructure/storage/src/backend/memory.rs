use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use domain_snapshot::{
    exception::EngineException,
    model::{entity::Snapshot, vo::SnapshotId},
    service::StorageBackend,
};

/// In-process backend keeping file sizes only.
///
/// Counts concurrent snapshot calls and can be told to fail, which makes it
/// the backend of choice for exercising the orchestrator.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    snapshot_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, u64>,
    snapshots: BTreeSet<PathBuf>,
    sealed: BTreeSet<PathBuf>,
    open_writers: BTreeSet<PathBuf>,
    usage_overrides: HashMap<PathBuf, u64>,
    failing_deletes: BTreeSet<PathBuf>,
    fail_snapshots: bool,
    unreachable: bool,
    snapshot_calls: usize,
    flushes: usize,
}

impl MemoryState {
    fn under<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = (&'a PathBuf, &'a u64)> + 'a {
        self.files.iter().filter(move |(p, _)| p.starts_with(root))
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every snapshot call sleeps this long before copying.
    pub fn with_snapshot_delay(delay: Duration) -> Self {
        Self {
            snapshot_delay: Some(delay),
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reachable(&self) -> anyhow::Result<MutexGuard<'_, MemoryState>> {
        let state = self.state();
        if state.unreachable {
            return Err(EngineException::BackendUnavailable {
                reason: "memory backend switched off".into(),
            }
            .into());
        }
        Ok(state)
    }

    pub fn write_file(&self, path: impl Into<PathBuf>, size: u64) {
        self.state().files.insert(path.into(), size);
    }

    pub fn remove_file(&self, path: &Path) {
        self.state().files.remove(path);
    }

    pub fn open_for_write(&self, path: impl Into<PathBuf>) {
        self.state().open_writers.insert(path.into());
    }

    pub fn close(&self, path: &Path) {
        self.state().open_writers.remove(path);
    }

    /// Report `bytes` for `path` instead of summing file sizes.
    pub fn set_usage(&self, path: impl Into<PathBuf>, bytes: u64) {
        self.state().usage_overrides.insert(path.into(), bytes);
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.state().fail_snapshots = fail;
    }

    pub fn fail_delete(&self, path: impl Into<PathBuf>) {
        self.state().failing_deletes.insert(path.into());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Seed a sealed snapshot directly into `history`.
    pub fn insert_sealed(&self, history: &Path, id: SnapshotId) -> PathBuf {
        let path = history.join(id.name());
        let mut state = self.state();
        state.snapshots.insert(path.clone());
        state.sealed.insert(path.clone());
        path
    }

    pub fn files_under(&self, root: &Path) -> Vec<PathBuf> {
        self.state().under(root).map(|(p, _)| p.clone()).collect()
    }

    pub fn snapshot_calls(&self) -> usize {
        self.state().snapshot_calls
    }

    pub fn flushes(&self) -> usize {
        self.state().flushes
    }

    /// Highest number of snapshot calls that were running at once.
    pub fn max_concurrent_snapshots(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn copy(&self, src: &Path, dst: &Path) -> anyhow::Result<()> {
        let mut state = self.reachable()?;
        if state.fail_snapshots {
            return Err(anyhow!("snapshot of {src:?} failed"));
        }
        if state.snapshots.contains(dst) {
            return Err(EngineException::SnapshotExists {
                path: dst.to_path_buf(),
            }
            .into());
        }
        let copied: Vec<(PathBuf, u64)> = state
            .under(src)
            .filter_map(|(p, size)| Some((dst.join(p.strip_prefix(src).ok()?), *size)))
            .collect();
        state.files.extend(copied);
        state.snapshots.insert(dst.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn snapshot(&self, src: &Path, dst: &Path) -> anyhow::Result<()> {
        self.state().snapshot_calls += 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.snapshot_delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.copy(src, dst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn set_read_only(&self, path: &Path, read_only: bool) -> anyhow::Result<()> {
        let mut state = self.reachable()?;
        if !state.snapshots.contains(path) {
            return Err(anyhow!("{path:?} is not a snapshot"));
        }
        if read_only {
            state.sealed.insert(path.to_path_buf());
        } else {
            state.sealed.remove(path);
        }
        Ok(())
    }

    async fn usage_bytes(&self, path: &Path) -> anyhow::Result<u64> {
        let state = self.reachable()?;
        if let Some(bytes) = state.usage_overrides.get(path) {
            return Ok(*bytes);
        }
        Ok(state.under(path).map(|(_, size)| size).sum())
    }

    async fn list_open_writers(&self, path: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let state = self.reachable()?;
        Ok(state
            .open_writers
            .iter()
            .filter_map(|p| p.strip_prefix(path).ok().map(Path::to_path_buf))
            .collect())
    }

    async fn delete(&self, path: &Path) -> anyhow::Result<()> {
        let mut state = self.reachable()?;
        if state.failing_deletes.contains(path) {
            return Err(anyhow!("delete of {path:?} failed"));
        }
        if !state.snapshots.remove(path) {
            return Err(anyhow!("{path:?} is not a snapshot"));
        }
        state.sealed.remove(path);
        state.files.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn flush(&self, _path: &Path) -> anyhow::Result<()> {
        self.reachable()?.flushes += 1;
        Ok(())
    }

    async fn is_empty(&self, path: &Path) -> anyhow::Result<bool> {
        Ok(self.reachable()?.under(path).next().is_none())
    }

    async fn remove_entry(&self, path: &Path) -> anyhow::Result<()> {
        let mut state = self.reachable()?;
        let sealed = state.sealed.iter().any(|s| path.starts_with(s));
        if sealed {
            return Err(anyhow!("{path:?} is inside a sealed snapshot"));
        }
        state.files.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn list_snapshots(&self, history: &Path) -> anyhow::Result<Vec<Snapshot>> {
        let state = self.reachable()?;
        let mut snapshots: Vec<Snapshot> = state
            .sealed
            .iter()
            .filter(|p| p.parent() == Some(history))
            .filter_map(|p| {
                let id = p.file_name()?.to_str()?.parse::<SnapshotId>().ok()?;
                Some(Snapshot {
                    id,
                    path: p.clone(),
                    size: Some(state.under(p).map(|(_, size)| size).sum()),
                    read_only: true,
                })
            })
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    async fn probe(&self) -> anyhow::Result<()> {
        self.reachable().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[tokio::test]
    async fn unsealed_snapshots_are_not_listed() {
        let backend = MemoryBackend::new();
        backend.write_file("/w/a", 3);
        backend.write_file("/w/b/c", 4);
        let id = SnapshotId::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        let dst = Path::new("/h").join(id.name());

        backend.snapshot(Path::new("/w"), &dst).await.unwrap();
        assert!(backend.list_snapshots(Path::new("/h")).await.unwrap().is_empty());
        backend.remove_entry(&dst.join("b/c")).await.unwrap();
        backend.set_read_only(&dst, true).await.unwrap();

        let listed = backend.list_snapshots(Path::new("/h")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].size, Some(3));
        assert!(backend.remove_entry(&dst.join("a")).await.is_err());
        assert_eq!(backend.usage_bytes(Path::new("/w")).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn unreachable_fails_everything() {
        let backend = MemoryBackend::new();
        backend.set_unreachable(true);
        assert!(backend.probe().await.is_err());
        assert!(backend.usage_bytes(Path::new("/w")).await.is_err());
    }
}
