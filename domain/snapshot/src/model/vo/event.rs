use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SnapshotId, Verdict};
use crate::model::entity::{MarkerOwner, SkipReason, Trigger};

/// One record of the structured decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    pub account: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EventKind {
    #[serde(rename_all = "camelCase")]
    Admission {
        verdict: Verdict,
        usage_bytes: Option<u64>,
        limit_bytes: Option<u64>,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    SnapshotCreated {
        snapshot: SnapshotId,
        trigger: Trigger,
        excluded_files: usize,
    },
    SnapshotSkipped { reason: SkipReason },
    SnapshotFailed { reason: String },
    StaleMarkerDiscarded { owner: MarkerOwner },
    RetentionDeleted { snapshot: SnapshotId, reason: String },
    RetentionDeleteFailed { snapshot: SnapshotId, reason: String },
}

impl EngineEvent {
    pub fn now(account: &str, kind: EventKind) -> Self {
        Self {
            account: account.to_owned(),
            at: Utc::now(),
            kind,
        }
    }
}
