use std::sync::Arc;

use domain_snapshot::{
    model::vo::{EngineEvent, EventKind, Verdict},
    service::EventLog,
};

/// Sends engine decisions to tracing and to the structured event log.
///
/// A failing log sink is reported but never fails the decision itself.
#[derive(Clone)]
pub struct EventRecorder {
    log: Arc<dyn EventLog>,
}

impl EventRecorder {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    pub async fn record(&self, account: &str, kind: EventKind) {
        let event = EngineEvent::now(account, kind);
        match &event.kind {
            EventKind::Admission {
                verdict: Verdict::Allow,
                reason,
                ..
            } => tracing::info!(account, "Admission allowed: {reason}"),
            EventKind::Admission {
                verdict, reason, ..
            } => tracing::warn!(account, "Admission {verdict:?}: {reason}"),
            EventKind::SnapshotCreated {
                snapshot,
                trigger,
                excluded_files,
            } => tracing::info!(
                account,
                "Snapshot {snapshot} created ({trigger:?}), {excluded_files} open files excluded"
            ),
            EventKind::SnapshotSkipped { reason } => {
                tracing::info!(account, "Snapshot skipped: {reason:?}")
            }
            EventKind::SnapshotFailed { reason } => {
                tracing::error!(account, "Snapshot failed: {reason}")
            }
            EventKind::StaleMarkerDiscarded { owner } => {
                tracing::warn!(account, "Discarded stale in-progress marker of {owner:?}")
            }
            EventKind::RetentionDeleted { snapshot, reason } => {
                tracing::info!(account, "Deleted snapshot {snapshot}: {reason}")
            }
            EventKind::RetentionDeleteFailed { snapshot, reason } => {
                tracing::warn!(account, "Unable to delete snapshot {snapshot}: {reason}")
            }
        }
        if let Err(e) = self.log.append(&event).await {
            tracing::error!(account, "Unable to append to event log: {e:#}");
        }
    }
}
