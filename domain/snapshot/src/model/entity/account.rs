use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::vo::{RetentionPolicy, SnapshotId};

/// A backup identity with one workspace and one history.
///
/// The workspace is writable by the account's client, the history only by the engine.
/// The two must be disjoint subtrees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    pub workspace: PathBuf,
    pub history: PathBuf,
    /// Absent means unlimited.
    pub quota_bytes: Option<u64>,
    /// Overrides the global retention policy.
    pub retention: Option<RetentionPolicy>,
}

impl Account {
    pub fn snapshot_path(&self, id: &SnapshotId) -> PathBuf {
        self.history.join(id.name())
    }

    /// Neither path may contain the other.
    pub fn has_disjoint_paths(&self) -> bool {
        !self.workspace.starts_with(&self.history) && !self.history.starts_with(&self.workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(workspace: &str, history: &str) -> Account {
        Account {
            name: "alice".into(),
            workspace: workspace.into(),
            history: history.into(),
            quota_bytes: None,
            retention: None,
        }
    }

    #[test]
    fn test_disjoint_paths() {
        assert!(account("/srv/alice/data", "/srv/alice/history").has_disjoint_paths());
        assert!(!account("/srv/alice", "/srv/alice/history").has_disjoint_paths());
        assert!(!account("/srv/alice/history/data", "/srv/alice/history").has_disjoint_paths());
    }
}
