use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::vo::SnapshotId;

/// Where an account's watcher currently is.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Idle,
    Monitoring,
    Admitting,
    Finalizing,
}

/// Why admission was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    /// No activity for the inactivity window.
    Quiesced,
    /// Activity went on for longer than the maximum wait.
    Forced,
    /// Requested by an operator.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    EmptyWorkspace,
    QuotaDenied,
}

/// Result of one admission/finalize attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SnapshotOutcome {
    Created { snapshot: SnapshotId },
    Skipped { reason: SkipReason },
    Failed { reason: String },
}

/// Identity of whoever holds an account's in-progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerOwner {
    pub pid: u32,
    /// Distinguishes engine processes that happen to reuse a pid.
    pub instance: Uuid,
    /// Watcher task within the instance.
    pub task: u64,
    /// Kernel start time of `pid` in clock ticks, so a recycled pid does not match.
    #[serde(default)]
    pub start_time: Option<u64>,
}

/// Single-flight marker. Present while a watcher owns the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InProgressMarker {
    pub owner: MarkerOwner,
    pub started_at: DateTime<Utc>,
}

/// Answer to "what is the engine doing for this account".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub phase: Phase,
    pub in_progress: bool,
    pub last_outcome: Option<SnapshotOutcome>,
    pub last_snapshot: Option<SnapshotId>,
    /// True once the history holds a sealed snapshot or this engine sealed one.
    /// A brand-new account whose first attempts were all denied reports false.
    pub ever_snapshotted: bool,
}
