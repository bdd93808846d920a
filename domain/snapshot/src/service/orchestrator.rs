use async_trait::async_trait;

use crate::model::entity::{AccountStatus, SnapshotOutcome};

/// What became of a write event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// A new watcher was started for the account.
    WatcherStarted,
    /// A stale marker was discarded and a new watcher started.
    WatcherRestarted,
    /// A live watcher already owns the account; only the timestamp moved.
    Recorded,
}

/// Turns bursts of workspace writes into single snapshots.
#[async_trait]
pub trait SnapshotOrchestratorService: Send + Sync {
    /// Handle one write event for `account`.
    async fn notify_activity(&self, account: &str) -> anyhow::Result<ActivityOutcome>;
    /// Admit and finalize right away under the single-flight marker.
    ///
    /// Returns `None` if a watcher currently owns the account.
    async fn trigger(&self, account: &str) -> anyhow::Result<Option<SnapshotOutcome>>;
    /// Discard persisted markers whose owners are gone. Returns how many were dropped.
    async fn recover(&self) -> anyhow::Result<usize>;
    fn is_in_progress(&self, account: &str) -> bool;
    async fn status(&self, account: &str) -> anyhow::Result<AccountStatus>;
}
