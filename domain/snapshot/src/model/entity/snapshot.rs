use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::vo::SnapshotId;

/// Sealed, immutable copy of a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: SnapshotId,
    pub path: PathBuf,
    /// Space held by the snapshot, if the backend reports it cheaply.
    pub size: Option<u64>,
    pub read_only: bool,
}
