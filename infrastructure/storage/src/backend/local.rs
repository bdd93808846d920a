use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use domain_snapshot::{
    exception::EngineException, model::entity::Snapshot, service::StorageBackend,
};
use typed_builder::TypedBuilder;

use super::{dir_is_empty, open_writers_under, remove_entry, sealed, snapshot_dirs};

/// Backend on a plain directory tree.
///
/// Snapshots are full copies and immutability is the permission bits, so usage
/// is a naive sum. Meant for filesystems without copy-on-write and for tests.
#[derive(Debug, TypedBuilder)]
pub struct LocalFsBackend {
    #[builder(setter(into))]
    root: PathBuf,
    #[builder(default = "/proc".into(), setter(into))]
    proc_root: PathBuf,
}

async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn snapshot(&self, src: &Path, dst: &Path) -> anyhow::Result<()> {
        if tokio::fs::try_exists(dst).await? {
            return Err(EngineException::SnapshotExists {
                path: dst.to_path_buf(),
            }
            .into());
        }
        let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
        blocking(move || {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            copy_tree(&src, &dst).with_context(|| format!("copy {src:?} to {dst:?}"))
        })
        .await
    }

    async fn set_read_only(&self, path: &Path, read_only: bool) -> anyhow::Result<()> {
        let path = path.to_path_buf();
        blocking(move || set_tree_read_only(&path, read_only)).await
    }

    async fn usage_bytes(&self, path: &Path) -> anyhow::Result<u64> {
        let path = path.to_path_buf();
        blocking(move || match fs::symlink_metadata(&path) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            _ => tree_size(&path),
        })
        .await
    }

    async fn list_open_writers(&self, path: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let (proc_root, path) = (self.proc_root.clone(), path.to_path_buf());
        blocking(move || open_writers_under(&proc_root, &path)).await
    }

    async fn delete(&self, path: &Path) -> anyhow::Result<()> {
        let path = path.to_path_buf();
        blocking(move || {
            set_tree_read_only(&path, false)?;
            fs::remove_dir_all(&path).with_context(|| format!("remove {path:?}"))
        })
        .await
    }

    async fn flush(&self, path: &Path) -> anyhow::Result<()> {
        let path = path.to_path_buf();
        blocking(move || {
            let dir = fs::File::open(&path).with_context(|| format!("open {path:?}"))?;
            rustix::fs::syncfs(&dir)?;
            Ok(())
        })
        .await
    }

    async fn is_empty(&self, path: &Path) -> anyhow::Result<bool> {
        dir_is_empty(path).await
    }

    async fn remove_entry(&self, path: &Path) -> anyhow::Result<()> {
        remove_entry(path).await
    }

    async fn list_snapshots(&self, history: &Path) -> anyhow::Result<Vec<Snapshot>> {
        let mut snapshots = vec![];
        for (id, path) in snapshot_dirs(history).await? {
            let metadata = tokio::fs::metadata(&path).await?;
            if metadata.permissions().readonly() {
                snapshots.push(sealed(id, path, None));
            }
        }
        Ok(snapshots)
    }

    async fn probe(&self) -> anyhow::Result<()> {
        rustix::fs::statvfs(self.root.as_path()).map_err(|e| {
            EngineException::BackendUnavailable {
                reason: format!("statvfs {:?}: {e}", self.root),
            }
        })?;
        Ok(())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    fs::create_dir(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let (from, to) = (entry.path(), dst.join(entry.file_name()));
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            symlink(fs::read_link(&from)?, &to)?;
        } else {
            match fs::copy(&from, &to) {
                // Removed between listing and copying.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
                Ok(_) => {}
            }
        }
    }
    Ok(())
}

/// Directories are made writable before their children and sealed after them.
fn set_tree_read_only(path: &Path, read_only: bool) -> anyhow::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mut permissions = metadata.permissions();
    if metadata.is_dir() {
        if !read_only {
            permissions.set_readonly(false);
            fs::set_permissions(path, permissions.clone())?;
        }
        for entry in fs::read_dir(path)? {
            set_tree_read_only(&entry?.path(), read_only)?;
        }
    }
    permissions.set_readonly(read_only);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

fn tree_size(path: &Path) -> anyhow::Result<u64> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        total += tree_size(&entry?.path())?;
    }
    Ok(total)
}
