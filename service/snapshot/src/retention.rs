use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use domain_snapshot::{
    model::{
        entity::Account,
        vo::{EventKind, RetentionPolicy, SnapshotId},
    },
    repository::AccountRepo,
    service::{RetentionReport, RetentionService, StorageBackend},
};
use typed_builder::TypedBuilder;

use crate::EventRecorder;

/// Snapshots `policy` keeps out of `ids`, evaluated at `now`.
///
/// Generational buckets cascade: daily, then weekly, then monthly, and a bucket
/// whose representative is already kept does not use up a count. The newest
/// snapshot is always kept so an account never loses its whole history.
pub fn select_retained(
    ids: &[SnapshotId],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> BTreeSet<SnapshotId> {
    let mut newest_first = ids.to_vec();
    newest_first.sort_unstable_by(|a, b| b.cmp(a));
    newest_first.dedup();

    let mut keep = BTreeSet::new();
    match *policy {
        RetentionPolicy::Age { max_age_days } => {
            let cutoff = now - Duration::days(i64::from(max_age_days));
            keep.extend(newest_first.iter().filter(|id| id.created_at() >= cutoff));
        }
        RetentionPolicy::Generational {
            daily,
            weekly,
            monthly,
        } => {
            keep.extend(newest_first.iter().take(daily as usize));
            keep_representatives(&newest_first, weekly, &mut keep, |id| {
                let week = id.created_at().iso_week();
                (week.year(), week.week())
            });
            keep_representatives(&newest_first, monthly, &mut keep, |id| {
                let at = id.created_at();
                (at.year(), at.month())
            });
        }
    }
    keep.extend(newest_first.first());
    keep
}

/// Walks `newest_first` taking the latest snapshot of each new bucket until `count`
/// snapshots not already in `keep` were added.
fn keep_representatives<K: PartialEq>(
    newest_first: &[SnapshotId],
    count: u32,
    keep: &mut BTreeSet<SnapshotId>,
    bucket: impl Fn(&SnapshotId) -> K,
) {
    let mut added = 0;
    let mut last_bucket = None;
    for id in newest_first {
        if added >= count {
            break;
        }
        let key = bucket(id);
        if last_bucket.as_ref() == Some(&key) {
            continue;
        }
        last_bucket = Some(key);
        if keep.insert(*id) {
            added += 1;
        }
    }
}

fn deletion_reason(policy: &RetentionPolicy) -> String {
    match policy {
        RetentionPolicy::Age { max_age_days } => format!("older than {max_age_days} days"),
        RetentionPolicy::Generational {
            daily,
            weekly,
            monthly,
        } => format!(
            "outside the {daily} daily, {weekly} weekly and {monthly} monthly representatives"
        ),
    }
}

/// Applies retention policies through the storage backend.
///
/// Only snapshots already sealed when the sweep lists them are considered, so it
/// can run alongside the orchestrator without sharing its lock.
#[derive(TypedBuilder)]
pub struct RetentionServiceImpl {
    backend: Arc<dyn StorageBackend>,
    accounts: Arc<dyn AccountRepo>,
    events: EventRecorder,
    #[builder(default = Utc::now)]
    clock: fn() -> DateTime<Utc>,
}

#[async_trait]
impl RetentionService for RetentionServiceImpl {
    async fn sweep_account(&self, account: &Account) -> anyhow::Result<RetentionReport> {
        let global = self.accounts.global_retention().await?;
        let policy = RetentionPolicy::resolve(account.retention.as_ref(), &global);
        let snapshots = self
            .backend
            .list_snapshots(&account.history)
            .await
            .with_context(|| format!("list snapshots of {}", account.name))?;
        let ids: Vec<SnapshotId> = snapshots.iter().map(|s| s.id).collect();
        let keep = select_retained(&ids, &policy, (self.clock)());

        let mut report = RetentionReport {
            retained: keep.iter().copied().collect(),
            ..Default::default()
        };
        for snapshot in snapshots.iter().filter(|s| !keep.contains(&s.id)) {
            match self.backend.delete(&snapshot.path).await {
                Ok(()) => {
                    report.deleted.push(snapshot.id);
                    self.events
                        .record(
                            &account.name,
                            EventKind::RetentionDeleted {
                                snapshot: snapshot.id,
                                reason: deletion_reason(&policy),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    report.failed.push(snapshot.id);
                    self.events
                        .record(
                            &account.name,
                            EventKind::RetentionDeleteFailed {
                                snapshot: snapshot.id,
                                reason: format!("{e:#}"),
                            },
                        )
                        .await;
                }
            }
        }
        Ok(report)
    }

    async fn sweep_all(&self) -> anyhow::Result<Vec<(String, RetentionReport)>> {
        let mut reports = vec![];
        for account in self.accounts.list().await? {
            match self.sweep_account(&account).await {
                Ok(report) => reports.push((account.name, report)),
                Err(e) => tracing::error!(account = %account.name, "Retention sweep failed: {e:#}"),
            }
        }
        Ok(reports)
    }
}
