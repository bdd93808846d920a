use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use async_trait::async_trait;
use domain_snapshot::{
    exception::EngineException, model::entity::Snapshot, service::StorageBackend,
};
use tokio::process::Command;
use typed_builder::TypedBuilder;

use super::{dir_is_empty, open_writers_under, remove_entry, sealed, snapshot_dirs};

/// Backend driving btrfs subvolumes through the `btrfs` CLI.
///
/// Workspaces must be subvolumes. Snapshots are taken writable so open files
/// can be removed, then sealed with the `ro` property.
#[derive(Debug, TypedBuilder)]
pub struct BtrfsBackend {
    #[builder(default = "btrfs".into(), setter(into))]
    program: String,
    /// Any path on the filesystem holding the accounts; used by `probe`.
    #[builder(setter(into))]
    root: PathBuf,
    #[builder(default = "/proc".into(), setter(into))]
    proc_root: PathBuf,
}

impl BtrfsBackend {
    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("spawn `{} {}`", self.program, args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "`{} {}` terminated with an exception. Exit status: {}, stderr: {}",
                self.program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn is_read_only(&self, path: &Path) -> anyhow::Result<bool> {
        let out = self.run(&["property", "get", "-ts", &display(path), "ro"]).await?;
        parse_ro_property(&out).context("The format of `btrfs property get` result is wrong")
    }
}

#[async_trait]
impl StorageBackend for BtrfsBackend {
    async fn snapshot(&self, src: &Path, dst: &Path) -> anyhow::Result<()> {
        if tokio::fs::try_exists(dst).await? {
            return Err(EngineException::SnapshotExists {
                path: dst.to_path_buf(),
            }
            .into());
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.run(&["subvolume", "snapshot", &display(src), &display(dst)]).await?;
        Ok(())
    }

    async fn set_read_only(&self, path: &Path, read_only: bool) -> anyhow::Result<()> {
        let value = if read_only { "true" } else { "false" };
        self.run(&["property", "set", "-ts", &display(path), "ro", value]).await?;
        Ok(())
    }

    async fn usage_bytes(&self, path: &Path) -> anyhow::Result<u64> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(0);
        }
        let out = self.run(&["filesystem", "du", "-s", "--raw", &display(path)]).await?;
        parse_du_usage(&out).context("The format of `btrfs filesystem du` result is wrong")
    }

    async fn list_open_writers(&self, path: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let (proc_root, path) = (self.proc_root.clone(), path.to_path_buf());
        tokio::task::spawn_blocking(move || open_writers_under(&proc_root, &path)).await?
    }

    async fn delete(&self, path: &Path) -> anyhow::Result<()> {
        if self.is_read_only(path).await? {
            self.set_read_only(path, false).await?;
        }
        self.run(&["subvolume", "delete", &display(path)]).await?;
        Ok(())
    }

    async fn flush(&self, path: &Path) -> anyhow::Result<()> {
        self.run(&["filesystem", "sync", &display(path)]).await?;
        Ok(())
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
            match self.is_read_only(&path).await {
                Ok(true) => snapshots.push(sealed(id, path, None)),
                Ok(false) => tracing::debug!("Skipping unsealed snapshot {path:?}"),
                Err(e) => tracing::warn!("Unable to read `ro` of {path:?}: {e:#}"),
            }
        }
        Ok(snapshots)
    }

    async fn probe(&self) -> anyhow::Result<()> {
        self.run(&["filesystem", "df", &display(&self.root)])
            .await
            .map_err(|e| EngineException::BackendUnavailable {
                reason: format!("{e:#}"),
            })?;
        Ok(())
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parse_ro_property(s: &str) -> Option<bool> {
    match s.trim().strip_prefix("ro=")? {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Exclusive plus set-shared bytes from the summary line, so shared extents count once.
fn parse_du_usage(s: &str) -> Option<u64> {
    let line = s.lines().filter(|l| !l.trim().is_empty()).last()?;
    let mut columns = line.split_whitespace();
    let _total = columns.next()?;
    let exclusive = parse_du_column(columns.next()?)?;
    let shared = parse_du_column(columns.next()?)?;
    Some(exclusive + shared)
}

fn parse_du_column(s: &str) -> Option<u64> {
    if s == "-" {
        return Some(0);
    }
    s.parse().ok()
}
