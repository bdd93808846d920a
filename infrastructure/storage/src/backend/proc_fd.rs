//! Finds files held open for writing by scanning `/proc/<pid>/fd`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

const ACCESS_MODE_MASK: u32 = 0o3;

/// Open-for-write files under `root`, relative to `root`.
///
/// Processes whose descriptors cannot be read (other users, exited meanwhile) are skipped.
pub fn open_writers_under(proc_root: &Path, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let root = fs::canonicalize(root).with_context(|| format!("canonicalize {root:?}"))?;
    let mut found = BTreeSet::new();
    let processes = fs::read_dir(proc_root).with_context(|| format!("read {proc_root:?}"))?;

    for process in processes.flatten() {
        if process.file_name().to_str().and_then(|s| s.parse::<u32>().ok()).is_none() {
            continue;
        }
        let Ok(fds) = fs::read_dir(process.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            let Ok(target) = fs::read_link(fd.path()) else {
                continue;
            };
            let Ok(relative) = target.strip_prefix(&root) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            let info = process.path().join("fdinfo").join(fd.file_name());
            let Ok(info) = fs::read_to_string(info) else {
                continue;
            };
            if parse_flags(&info).is_some_and(is_write_mode) {
                found.insert(relative.to_path_buf());
            }
        }
    }
    Ok(found.into_iter().collect())
}

fn parse_flags(fdinfo: &str) -> Option<u32> {
    let flags = fdinfo.lines().find_map(|line| line.strip_prefix("flags:"))?;
    u32::from_str_radix(flags.trim(), 8).ok()
}

#[inline]
fn is_write_mode(flags: u32) -> bool {
    flags & ACCESS_MODE_MASK != 0
}
