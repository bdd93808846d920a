mod btrfs;
mod local;
mod memory;
mod proc_fd;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use domain_snapshot::model::{entity::Snapshot, vo::SnapshotId};

#[rustfmt::skip]
pub use {
    btrfs::BtrfsBackend,
    local::LocalFsBackend,
    memory::MemoryBackend,
    proc_fd::open_writers_under,
};

async fn dir_is_empty(path: &Path) -> anyhow::Result<bool> {
    let mut entries =
        tokio::fs::read_dir(path).await.with_context(|| format!("read directory {path:?}"))?;
    Ok(entries.next_entry().await?.is_none())
}

async fn remove_entry(path: &Path) -> anyhow::Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("stat {path:?}")),
    };
    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match removed {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            Err(e).with_context(|| format!("remove {path:?}"))
        }
        _ => Ok(()),
    }
}

/// Directories under `history` whose names parse as snapshot ids, oldest first.
async fn snapshot_dirs(history: &Path) -> anyhow::Result<Vec<(SnapshotId, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(history).await {
        Ok(x) => x,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e).with_context(|| format!("read directory {history:?}")),
    };
    let mut found = vec![];
    while let Some(entry) = entries.next_entry().await? {
        let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<SnapshotId>().ok())
        else {
            continue;
        };
        if entry.file_type().await?.is_dir() {
            found.push((id, entry.path()));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

fn sealed(id: SnapshotId, path: PathBuf, size: Option<u64>) -> Snapshot {
    Snapshot {
        id,
        path,
        size,
        read_only: true,
    }
}
