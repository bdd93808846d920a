use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use domain_snapshot::{
    model::{
        entity::{
            Account, AccountStatus, InProgressMarker, MarkerOwner, Phase, SkipReason,
            SnapshotOutcome, Trigger,
        },
        vo::{EventKind, OrchestratorSettings, SnapshotId},
    },
    repository::{AccountRepo, MarkerRepo},
    service::{
        ActivityOutcome, ActivityTracker, QuotaAdmissionService, SnapshotOrchestratorService,
        StorageBackend,
    },
};
use tokio::time::Instant;
use tracing::Instrument;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    owner::{current_pid, foreign_owner_alive, process_start_time},
    EventRecorder, HealthMonitor,
};

/// Ephemeral per-account state, guarded by its map entry.
#[derive(Debug, Default)]
struct AccountSlot {
    phase: Phase,
    marker: Option<InProgressMarker>,
    last_outcome: Option<SnapshotOutcome>,
    last_snapshot: Option<SnapshotId>,
}

/// Registration of a running sequence. Dropping it, by completion, panic or
/// abort, makes its marker stale.
struct LiveTask {
    id: u64,
    registry: Arc<DashSet<u64>>,
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Right to run one admission/finalize sequence for an account.
struct Lease {
    marker: InProgressMarker,
    stale: Option<MarkerOwner>,
    _live: LiveTask,
}

enum Acquire {
    Acquired(Lease),
    Busy,
}

/// Debounces workspace activity into snapshots, one sequence per account at a time.
///
/// Cloning shares all state; watcher tasks run on clones.
#[derive(TypedBuilder, Clone)]
pub struct SnapshotOrchestratorImpl {
    accounts: Arc<dyn AccountRepo>,
    tracker: Arc<dyn ActivityTracker>,
    quota: Arc<dyn QuotaAdmissionService>,
    backend: Arc<dyn StorageBackend>,
    markers: Arc<dyn MarkerRepo>,
    events: EventRecorder,
    #[builder(default, setter(strip_option))]
    health: Option<Arc<HealthMonitor>>,
    #[builder(default)]
    settings: OrchestratorSettings,
    #[builder(default, setter(skip))]
    slots: Arc<DashMap<String, AccountSlot>>,
    #[builder(default, setter(skip))]
    live_tasks: Arc<DashSet<u64>>,
    #[builder(default, setter(skip))]
    next_task: Arc<AtomicU64>,
    #[builder(default = Uuid::new_v4(), setter(skip))]
    instance: Uuid,
    #[builder(default = process_start_time(current_pid()), setter(skip))]
    start_time: Option<u64>,
}

impl SnapshotOrchestratorImpl {
    fn is_alive(&self, owner: &MarkerOwner) -> bool {
        if owner.instance == self.instance {
            self.live_tasks.contains(&owner.task)
        } else {
            foreign_owner_alive(owner)
        }
    }

    /// Take the account's marker unless a live owner holds it.
    ///
    /// Check and set happen under the account's entry lock.
    fn try_acquire(&self, account: &str, phase: Phase) -> Acquire {
        let mut slot = self.slots.entry(account.to_owned()).or_default();
        let stale = match &slot.marker {
            Some(marker) if self.is_alive(&marker.owner) => return Acquire::Busy,
            Some(marker) => Some(marker.owner),
            None => None,
        };
        let owner = MarkerOwner {
            pid: current_pid(),
            instance: self.instance,
            task: self.next_task.fetch_add(1, Ordering::Relaxed),
            start_time: self.start_time,
        };
        self.live_tasks.insert(owner.task);
        let marker = InProgressMarker {
            owner,
            started_at: Utc::now(),
        };
        slot.marker = Some(marker.clone());
        slot.phase = phase;
        Acquire::Acquired(Lease {
            marker,
            stale,
            _live: LiveTask {
                id: owner.task,
                registry: self.live_tasks.clone(),
            },
        })
    }

    /// Persist the marker and report what it replaced.
    async fn announce(&self, account: &str, lease: &Lease) {
        if let Err(e) = self.markers.save(account, &lease.marker).await {
            tracing::warn!(account, "Unable to persist in-progress marker: {e:#}");
        }
        if let Some(owner) = lease.stale {
            self.events
                .record(account, EventKind::StaleMarkerDiscarded { owner })
                .await;
        }
    }

    /// Runs after every attempt whatever its outcome.
    async fn release(&self, account: &str, lease: Lease) {
        if let Err(e) = self.markers.remove(account).await {
            tracing::warn!(account, "Unable to remove persisted marker: {e:#}");
        }
        if let Some(mut slot) = self.slots.get_mut(account) {
            if slot.marker.as_ref().map(|m| m.owner) == Some(lease.marker.owner) {
                slot.marker = None;
                slot.phase = Phase::Idle;
            }
        }
    }

    fn set_phase(&self, account: &str, phase: Phase) {
        if let Some(mut slot) = self.slots.get_mut(account) {
            slot.phase = phase;
        }
    }

    fn spawn_watcher(&self, account: Account, lease: Lease) {
        let span = tracing::info_span!("snapshot_watcher", account = %account.name);
        let this = self.clone();
        tokio::spawn(
            async move {
                let trigger = this.wait_for_quiescence(&account.name).await;
                this.run_attempt(&account, trigger, lease).await;
            }
            .instrument(span),
        );
    }

    /// Poll until the account has been quiet for the inactivity window or the
    /// maximum wait since monitoring began has passed.
    async fn wait_for_quiescence(&self, account: &str) -> Trigger {
        let started = Instant::now();
        loop {
            tokio::time::sleep(self.settings.poll_interval).await;
            let now = Instant::now();
            let last = self.tracker.last_activity(account).unwrap_or(started);
            if now.saturating_duration_since(last) >= self.settings.inactivity_window {
                return Trigger::Quiesced;
            }
            if now.saturating_duration_since(started) >= self.settings.max_wait {
                tracing::info!(
                    account,
                    "Still active after {:?}, forcing admission",
                    self.settings.max_wait
                );
                return Trigger::Forced;
            }
        }
    }

    async fn run_attempt(
        &self,
        account: &Account,
        trigger: Trigger,
        lease: Lease,
    ) -> SnapshotOutcome {
        let attempt_started = Instant::now();
        self.set_phase(&account.name, Phase::Admitting);
        let (outcome, excluded) = self.admit_and_finalize(account).await;
        self.record_outcome(&account.name, trigger, &outcome, excluded).await;
        self.release(&account.name, lease).await;

        // Writes that landed during the attempt belong to a new burst.
        if !self.tracker.clear_through(&account.name, attempt_started) {
            if let Acquire::Acquired(lease) = self.try_acquire(&account.name, Phase::Monitoring) {
                self.announce(&account.name, &lease).await;
                self.spawn_watcher(account.clone(), lease);
            }
        }
        outcome
    }

    /// Returns the outcome and how many open files were left out of the snapshot.
    async fn admit_and_finalize(&self, account: &Account) -> (SnapshotOutcome, usize) {
        match self.backend.is_empty(&account.workspace).await {
            Ok(true) => {
                let reason = SkipReason::EmptyWorkspace;
                return (SnapshotOutcome::Skipped { reason }, 0);
            }
            Ok(false) => {}
            Err(e) => return (self.failed(e.context("inspect workspace")).await, 0),
        }
        match self.quota.admit(account).await {
            Ok(admission) if admission.is_denied() => {
                let reason = SkipReason::QuotaDenied;
                return (SnapshotOutcome::Skipped { reason }, 0);
            }
            Ok(_) => {}
            Err(e) => return (self.failed(e.context("quota admission")).await, 0),
        }

        self.set_phase(&account.name, Phase::Finalizing);
        match self.finalize(account).await {
            Ok((snapshot, excluded)) => (SnapshotOutcome::Created { snapshot }, excluded),
            Err(e) => (self.failed(e).await, 0),
        }
    }

    async fn failed(&self, e: anyhow::Error) -> SnapshotOutcome {
        if let Some(health) = &self.health {
            health.check().await;
        }
        SnapshotOutcome::Failed {
            reason: format!("{e:#}"),
        }
    }

    async fn finalize(&self, account: &Account) -> anyhow::Result<(SnapshotId, usize)> {
        self.backend.flush(&account.workspace).await.context("flush workspace")?;
        let id = SnapshotId::next_after(Utc::now(), self.last_snapshot(account).await?.as_ref());
        let path = account.snapshot_path(&id);
        self.backend
            .snapshot(&account.workspace, &path)
            .await
            .with_context(|| format!("create snapshot {id}"))?;

        match self.seal(account, &path).await {
            Ok(excluded) => Ok((id, excluded)),
            Err(e) => {
                if let Err(cleanup) = self.backend.delete(&path).await {
                    tracing::error!(
                        account = %account.name,
                        "Unable to remove unsealed snapshot {path:?}: {cleanup:#}"
                    );
                }
                Err(e)
            }
        }
    }

    /// Drop files still open for writing from the copy, then make it immutable.
    async fn seal(&self, account: &Account, path: &Path) -> anyhow::Result<usize> {
        let open = self
            .backend
            .list_open_writers(&account.workspace)
            .await
            .context("list files open for writing")?;
        for file in &open {
            self.backend
                .remove_entry(&path.join(file))
                .await
                .with_context(|| format!("exclude open file {file:?}"))?;
        }
        self.backend.set_read_only(path, true).await.context("seal snapshot")?;
        Ok(open.len())
    }

    async fn last_snapshot(&self, account: &Account) -> anyhow::Result<Option<SnapshotId>> {
        let listed = self
            .backend
            .list_snapshots(&account.history)
            .await
            .context("list snapshots")?
            .last()
            .map(|s| s.id);
        let remembered = self.slots.get(&account.name).and_then(|slot| slot.last_snapshot);
        Ok(listed.max(remembered))
    }

    async fn record_outcome(
        &self,
        account: &str,
        trigger: Trigger,
        outcome: &SnapshotOutcome,
        excluded_files: usize,
    ) {
        if let Some(mut slot) = self.slots.get_mut(account) {
            slot.last_outcome = Some(outcome.clone());
            if let SnapshotOutcome::Created { snapshot } = outcome {
                slot.last_snapshot = Some(*snapshot);
            }
        }
        let kind = match outcome {
            SnapshotOutcome::Created { snapshot } => EventKind::SnapshotCreated {
                snapshot: *snapshot,
                trigger,
                excluded_files,
            },
            SnapshotOutcome::Skipped { reason } => EventKind::SnapshotSkipped { reason: *reason },
            SnapshotOutcome::Failed { reason } => EventKind::SnapshotFailed {
                reason: reason.clone(),
            },
        };
        self.events.record(account, kind).await;
    }
}

#[async_trait]
impl SnapshotOrchestratorService for SnapshotOrchestratorImpl {
    async fn notify_activity(&self, account: &str) -> anyhow::Result<ActivityOutcome> {
        let account = self.accounts.get_required(account).await?;
        self.tracker.record_activity(&account.name, Instant::now());
        let lease = match self.try_acquire(&account.name, Phase::Monitoring) {
            Acquire::Busy => return Ok(ActivityOutcome::Recorded),
            Acquire::Acquired(lease) => lease,
        };
        let outcome = match lease.stale {
            Some(_) => ActivityOutcome::WatcherRestarted,
            None => ActivityOutcome::WatcherStarted,
        };
        self.announce(&account.name, &lease).await;
        self.spawn_watcher(account, lease);
        Ok(outcome)
    }

    async fn trigger(&self, account: &str) -> anyhow::Result<Option<SnapshotOutcome>> {
        let account = self.accounts.get_required(account).await?;
        let lease = match self.try_acquire(&account.name, Phase::Admitting) {
            Acquire::Busy => return Ok(None),
            Acquire::Acquired(lease) => lease,
        };
        self.announce(&account.name, &lease).await;
        Ok(Some(self.run_attempt(&account, Trigger::Manual, lease).await))
    }

    async fn recover(&self) -> anyhow::Result<usize> {
        let mut discarded = 0;
        for (account, marker) in self.markers.load_all().await? {
            if self.is_alive(&marker.owner) {
                tracing::info!(account = %account, "In-progress marker still owned by {:?}", marker.owner);
                self.slots.entry(account).or_default().marker.get_or_insert(marker);
                continue;
            }
            if let Err(e) = self.markers.remove(&account).await {
                tracing::warn!(account = %account, "Unable to remove stale marker: {e:#}");
            }
            self.events
                .record(&account, EventKind::StaleMarkerDiscarded { owner: marker.owner })
                .await;
            discarded += 1;
        }
        Ok(discarded)
    }

    fn is_in_progress(&self, account: &str) -> bool {
        self.slots
            .get(account)
            .and_then(|slot| slot.marker.as_ref().map(|m| self.is_alive(&m.owner)))
            .unwrap_or(false)
    }

    async fn status(&self, account: &str) -> anyhow::Result<AccountStatus> {
        let account = self.accounts.get_required(account).await?;
        let last_snapshot = self.last_snapshot(&account).await?;
        let in_progress = self.is_in_progress(&account.name);
        let (phase, last_outcome) = self
            .slots
            .get(&account.name)
            .map(|slot| (slot.phase, slot.last_outcome.clone()))
            .unwrap_or_default();
        Ok(AccountStatus {
            phase: if in_progress { phase } else { Phase::Idle },
            in_progress,
            last_outcome,
            last_snapshot,
            ever_snapshotted: last_snapshot.is_some(),
        })
    }
}
