use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use domain_snapshot::{
    exception::EngineException,
    model::{
        entity::{Account, InProgressMarker, MarkerOwner, Phase, SkipReason, SnapshotOutcome, Trigger},
        vo::{EngineEvent, EventKind, OrchestratorSettings, RetentionPolicy, SnapshotId, Verdict},
    },
    repository::MarkerRepo,
    service::{ActivityOutcome, RetentionService, SnapshotOrchestratorService, StorageBackend},
};
use infrastructure_storage::{
    backend::{LocalFsBackend, MemoryBackend},
    MemoryEventLog, MemoryMarkerRepo, StaticAccountRepo,
};
use service_snapshot::{
    ActivityTrackerImpl, EventRecorder, Health, HealthMonitor, QuotaAdmissionServiceImpl,
    process_start_time, RetentionServiceImpl, SnapshotOrchestratorImpl,
};
use tokio::time::sleep;

const GIB: u64 = 1 << 30;

fn account(root: &Path, name: &str, quota_bytes: Option<u64>) -> Account {
    Account {
        name: name.into(),
        workspace: root.join(name).join("data"),
        history: root.join(name).join("history"),
        quota_bytes,
        retention: None,
    }
}

struct Harness {
    backend: Arc<MemoryBackend>,
    markers: Arc<MemoryMarkerRepo>,
    log: Arc<MemoryEventLog>,
    health: Arc<HealthMonitor>,
    orchestrator: SnapshotOrchestratorImpl,
    alice: Account,
}

fn wire(
    backend: Arc<dyn StorageBackend>,
    accounts: Vec<Account>,
    settings: OrchestratorSettings,
    markers: Arc<MemoryMarkerRepo>,
    log: Arc<MemoryEventLog>,
    health: Arc<HealthMonitor>,
) -> SnapshotOrchestratorImpl {
    let events = EventRecorder::new(log);
    SnapshotOrchestratorImpl::builder()
        .accounts(Arc::new(StaticAccountRepo::builder().accounts(accounts).build()))
        .tracker(Arc::new(ActivityTrackerImpl::new()))
        .quota(Arc::new(
            QuotaAdmissionServiceImpl::builder()
                .backend(backend.clone())
                .events(events.clone())
                .build(),
        ))
        .backend(backend)
        .markers(markers)
        .events(events)
        .health(health)
        .settings(settings)
        .build()
}

impl Harness {
    fn new(backend: MemoryBackend) -> Self {
        Self::with_settings(backend, OrchestratorSettings::default())
    }

    fn with_settings(backend: MemoryBackend, settings: OrchestratorSettings) -> Self {
        let backend = Arc::new(backend);
        let markers = Arc::new(MemoryMarkerRepo::new());
        let log = Arc::new(MemoryEventLog::new());
        let health = Arc::new(HealthMonitor::new(backend.clone()));
        let root = Path::new("/srv");
        let alice = account(root, "alice", Some(GIB));
        let orchestrator = wire(
            backend.clone(),
            vec![alice.clone(), account(root, "bob", Some(GIB))],
            settings,
            markers.clone(),
            log.clone(),
            health.clone(),
        );
        backend.write_file(alice.workspace.join("notes.txt"), 1024);
        Self {
            backend,
            markers,
            log,
            health,
            orchestrator,
            alice,
        }
    }

    fn events(&self) -> Vec<EngineEvent> {
        self.log.events()
    }

    fn created(&self) -> Vec<(SnapshotId, Trigger, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::SnapshotCreated {
                    snapshot,
                    trigger,
                    excluded_files,
                } => Some((snapshot, trigger, excluded_files)),
                _ => None,
            })
            .collect()
    }

    async fn sealed(&self) -> Vec<SnapshotId> {
        let listed = self.backend.list_snapshots(&self.alice.history).await.unwrap();
        listed.into_iter().map(|s| s.id).collect()
    }
}

#[tokio::test(start_paused = true)]
async fn burst_of_writes_gives_one_snapshot() {
    let h = Harness::new(MemoryBackend::new());

    assert_eq!(
        h.orchestrator.notify_activity("alice").await.unwrap(),
        ActivityOutcome::WatcherStarted
    );
    for _ in 0..3 {
        sleep(Duration::from_secs(20)).await;
        assert_eq!(
            h.orchestrator.notify_activity("alice").await.unwrap(),
            ActivityOutcome::Recorded
        );
    }
    assert_eq!(h.orchestrator.status("alice").await.unwrap().phase, Phase::Monitoring);
    assert_eq!(h.backend.snapshot_calls(), 0);

    sleep(Duration::from_secs(70)).await;
    assert_eq!(h.backend.snapshot_calls(), 1);
    let created = h.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1, Trigger::Quiesced);
    assert_eq!(h.sealed().await, vec![created[0].0]);
    assert!(!h.orchestrator.is_in_progress("alice"));
    assert!(h.markers.load_all().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn separate_bursts_give_separate_snapshots() {
    let h = Harness::new(MemoryBackend::new());

    h.orchestrator.notify_activity("alice").await.unwrap();
    sleep(Duration::from_secs(90)).await;
    assert_eq!(
        h.orchestrator.notify_activity("alice").await.unwrap(),
        ActivityOutcome::WatcherStarted
    );
    sleep(Duration::from_secs(90)).await;

    let sealed = h.sealed().await;
    assert_eq!(sealed.len(), 2);
    assert!(sealed[0] < sealed[1]);
    let flushes = h.backend.flushes();
    assert_eq!(flushes, 2);
}

#[tokio::test(start_paused = true)]
async fn continuous_writes_are_forced_after_max_wait() {
    let settings = OrchestratorSettings {
        poll_interval: Duration::from_secs(5),
        inactivity_window: Duration::from_secs(60),
        max_wait: Duration::from_secs(300),
    };
    let h = Harness::with_settings(MemoryBackend::new(), settings);

    for _ in 0..11 {
        h.orchestrator.notify_activity("alice").await.unwrap();
        sleep(Duration::from_secs(30)).await;
    }

    let created = h.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1, Trigger::Forced);
}

#[tokio::test(start_paused = true)]
async fn one_sequence_per_account() {
    let h = Harness::new(MemoryBackend::with_snapshot_delay(Duration::from_secs(10)));

    let outcomes =
        futures::future::join_all((0..10).map(|_| h.orchestrator.trigger("alice"))).await;
    let ran: Vec<_> = outcomes.into_iter().filter_map(|o| o.unwrap()).collect();
    assert_eq!(ran.len(), 1);
    assert!(matches!(ran[0], SnapshotOutcome::Created { .. }));
    assert_eq!(h.backend.max_concurrent_snapshots(), 1);
    assert_eq!(h.backend.snapshot_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn writes_during_finalize_start_a_new_burst() {
    let h = Harness::new(MemoryBackend::with_snapshot_delay(Duration::from_secs(10)));

    let (manual, during) = tokio::join!(h.orchestrator.trigger("alice"), async {
        sleep(Duration::from_secs(1)).await;
        h.orchestrator.notify_activity("alice").await.unwrap()
    });
    assert!(matches!(manual.unwrap(), Some(SnapshotOutcome::Created { .. })));
    assert_eq!(during, ActivityOutcome::Recorded);
    assert!(h.orchestrator.is_in_progress("alice"));

    sleep(Duration::from_secs(90)).await;
    let triggers: Vec<_> = h.created().into_iter().map(|(_, t, _)| t).collect();
    assert_eq!(triggers, vec![Trigger::Manual, Trigger::Quiesced]);
    assert_eq!(h.backend.max_concurrent_snapshots(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_events_start_one_watcher() {
    let h = Arc::new(Harness::new(MemoryBackend::new()));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.orchestrator.notify_activity("alice").await.unwrap() })
        })
        .collect();
    let outcomes = futures::future::join_all(tasks).await;
    let started = outcomes
        .into_iter()
        .filter(|o| matches!(o, Ok(ActivityOutcome::WatcherStarted)))
        .count();
    assert_eq!(started, 1);
}

#[tokio::test(start_paused = true)]
async fn open_files_stay_out_of_the_snapshot() {
    let h = Harness::new(MemoryBackend::new());
    let db = h.alice.workspace.join("mail/db.sqlite");
    h.backend.write_file(&db, 4096);
    h.backend.open_for_write(&db);

    let outcome = h.orchestrator.trigger("alice").await.unwrap().unwrap();
    let SnapshotOutcome::Created { snapshot } = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    let copy = h.alice.snapshot_path(&snapshot);
    assert_eq!(h.backend.files_under(&copy), vec![copy.join("notes.txt")]);
    assert!(h.backend.files_under(&h.alice.workspace).contains(&db));
    assert_eq!(h.created()[0].2, 1);
}

#[tokio::test]
async fn open_files_stay_out_of_a_local_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let alice = account(dir.path(), "alice", None);
    std::fs::create_dir_all(&alice.workspace).unwrap();
    std::fs::write(alice.workspace.join("notes.txt"), b"done").unwrap();
    let _writer = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(alice.workspace.join("upload.part"))
        .unwrap();

    let backend: Arc<dyn StorageBackend> = Arc::new(LocalFsBackend::builder().root(dir.path()).build());
    let orchestrator = wire(
        backend.clone(),
        vec![alice.clone()],
        OrchestratorSettings::default(),
        Arc::new(MemoryMarkerRepo::new()),
        Arc::new(MemoryEventLog::new()),
        Arc::new(HealthMonitor::new(backend.clone())),
    );

    let outcome = orchestrator.trigger("alice").await.unwrap().unwrap();
    let SnapshotOutcome::Created { snapshot } = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    let copy = alice.snapshot_path(&snapshot);
    assert_eq!(std::fs::read(copy.join("notes.txt")).unwrap(), b"done");
    assert!(!copy.join("upload.part").exists());
    assert!(alice.workspace.join("upload.part").exists());
    assert_eq!(backend.list_snapshots(&alice.history).await.unwrap().len(), 1);

    backend.delete(&copy).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn quota_warns_then_denies() {
    let h = Harness::new(MemoryBackend::new());
    h.backend.set_usage(&h.alice.workspace, GIB * 87 / 100);
    h.backend.set_usage(&h.alice.history, GIB * 5 / 100);

    let first = h.orchestrator.trigger("alice").await.unwrap().unwrap();
    assert!(matches!(first, SnapshotOutcome::Created { .. }));

    h.backend.set_usage(&h.alice.workspace, GIB * 102 / 100);
    let second = h.orchestrator.trigger("alice").await.unwrap().unwrap();
    assert_eq!(
        second,
        SnapshotOutcome::Skipped {
            reason: SkipReason::QuotaDenied
        }
    );
    assert_eq!(h.sealed().await.len(), 1);
    assert!(!h.backend.files_under(&h.alice.workspace).is_empty());

    let verdicts: Vec<_> = h
        .events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::Admission { verdict, .. } => Some(verdict),
            _ => None,
        })
        .collect();
    assert_eq!(verdicts, vec![Verdict::Warn, Verdict::Deny]);

    let status = h.orchestrator.status("alice").await.unwrap();
    assert!(status.ever_snapshotted);
    assert_eq!(status.last_outcome, Some(second));
}

#[tokio::test(start_paused = true)]
async fn account_denied_from_the_start_has_never_snapshotted() {
    let h = Harness::new(MemoryBackend::new());
    h.backend.write_file("/srv/bob/data/huge.iso", GIB + 1);

    let outcome = h.orchestrator.trigger("bob").await.unwrap();
    assert_eq!(
        outcome,
        Some(SnapshotOutcome::Skipped {
            reason: SkipReason::QuotaDenied
        })
    );
    let status = h.orchestrator.status("bob").await.unwrap();
    assert!(!status.ever_snapshotted);
    assert_eq!(status.last_snapshot, None);
}

#[tokio::test(start_paused = true)]
async fn empty_workspace_is_skipped() {
    let h = Harness::new(MemoryBackend::new());
    h.backend.remove_file(&h.alice.workspace.join("notes.txt"));

    let outcome = h.orchestrator.trigger("alice").await.unwrap();
    assert_eq!(
        outcome,
        Some(SnapshotOutcome::Skipped {
            reason: SkipReason::EmptyWorkspace
        })
    );
    assert_eq!(h.backend.snapshot_calls(), 0);
    assert!(h.events().iter().any(|e| matches!(
        e.kind,
        EventKind::SnapshotSkipped {
            reason: SkipReason::EmptyWorkspace
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn failure_releases_the_account() {
    let h = Harness::new(MemoryBackend::new());
    h.backend.fail_snapshots(true);

    let outcome = h.orchestrator.trigger("alice").await.unwrap().unwrap();
    assert!(matches!(outcome, SnapshotOutcome::Failed { .. }));
    assert!(!h.orchestrator.is_in_progress("alice"));
    assert!(h.markers.load_all().await.unwrap().is_empty());
    assert!(h.sealed().await.is_empty());

    h.backend.fail_snapshots(false);
    let retry = h.orchestrator.trigger("alice").await.unwrap().unwrap();
    assert!(matches!(retry, SnapshotOutcome::Created { .. }));
}

#[tokio::test(start_paused = true)]
async fn unreachable_backend_degrades_health() {
    let h = Harness::new(MemoryBackend::new());
    h.backend.set_unreachable(true);

    let outcome = h.orchestrator.trigger("alice").await.unwrap().unwrap();
    assert!(matches!(outcome, SnapshotOutcome::Failed { .. }));
    assert!(h.health.is_degraded());

    h.backend.set_unreachable(false);
    assert_eq!(h.health.check().await, Health::Healthy);
}

#[tokio::test(start_paused = true)]
async fn aborted_sequence_leaves_a_stale_marker() {
    let h = Harness::new(MemoryBackend::with_snapshot_delay(Duration::from_secs(10)));

    let orchestrator = h.orchestrator.clone();
    let running = tokio::spawn(async move { orchestrator.trigger("alice").await });
    sleep(Duration::from_secs(1)).await;
    assert!(h.orchestrator.is_in_progress("alice"));
    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());

    assert!(!h.orchestrator.is_in_progress("alice"));
    assert_eq!(h.markers.load_all().await.unwrap().len(), 1);
    assert_eq!(
        h.orchestrator.notify_activity("alice").await.unwrap(),
        ActivityOutcome::WatcherRestarted
    );
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e.kind, EventKind::StaleMarkerDiscarded { .. })));

    sleep(Duration::from_secs(90)).await;
    assert_eq!(h.sealed().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn recover_discards_markers_of_dead_processes() {
    let h = Harness::new(MemoryBackend::new());
    let dead = MarkerOwner {
        pid: i32::MAX as u32,
        instance: uuid::Uuid::new_v4(),
        task: 3,
        start_time: None,
    };
    h.markers
        .save(
            "alice",
            &InProgressMarker {
                owner: dead,
                started_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    assert_eq!(h.orchestrator.recover().await.unwrap(), 1);
    assert!(h.markers.load_all().await.unwrap().is_empty());
    assert!(!h.orchestrator.is_in_progress("alice"));
    assert!(h
        .events()
        .iter()
        .any(|e| e.kind == EventKind::StaleMarkerDiscarded { owner: dead }));
    assert_eq!(
        h.orchestrator.notify_activity("alice").await.unwrap(),
        ActivityOutcome::WatcherStarted
    );
}

#[tokio::test(start_paused = true)]
async fn recover_discards_markers_whose_pid_was_recycled() {
    let h = Harness::new(MemoryBackend::new());
    // A crashed engine that had our pid, and one whose pid now names another process.
    let ours = std::process::id();
    let parent = std::os::unix::process::parent_id();
    let parent_started = process_start_time(parent).unwrap();
    for (account, pid, start_time) in [
        ("alice", ours, process_start_time(ours)),
        ("bob", parent, Some(parent_started + 1)),
    ] {
        let owner = MarkerOwner {
            pid,
            instance: uuid::Uuid::new_v4(),
            task: 0,
            start_time,
        };
        h.markers
            .save(
                account,
                &InProgressMarker {
                    owner,
                    started_at: Utc::now(),
                },
            )
            .await
            .unwrap();
    }

    assert_eq!(h.orchestrator.recover().await.unwrap(), 2);
    assert!(h.markers.load_all().await.unwrap().is_empty());
    assert!(!h.orchestrator.is_in_progress("alice"));
    assert!(!h.orchestrator.is_in_progress("bob"));

    assert_eq!(
        h.orchestrator.notify_activity("alice").await.unwrap(),
        ActivityOutcome::WatcherStarted
    );
    sleep(Duration::from_secs(90)).await;
    assert_eq!(h.sealed().await.len(), 1);
    assert!(!h.orchestrator.is_in_progress("alice"));
}

#[tokio::test(start_paused = true)]
async fn unknown_account_is_rejected() {
    let h = Harness::new(MemoryBackend::new());
    for e in [
        h.orchestrator.notify_activity("mallory").await.unwrap_err(),
        h.orchestrator.trigger("mallory").await.unwrap_err(),
    ] {
        assert!(matches!(
            e.downcast_ref::<EngineException>(),
            Some(EngineException::UnknownAccount { name }) if name == "mallory"
        ));
    }
}

fn feb_5() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 5, 18, 0, 0).unwrap()
}

#[tokio::test]
async fn retention_sweep_survives_failed_deletes() {
    let backend = Arc::new(MemoryBackend::new());
    let mut alice = account(Path::new("/srv"), "alice", None);
    alice.retention = Some(RetentionPolicy::Generational {
        daily: 2,
        weekly: 2,
        monthly: 2,
    });
    let days: Vec<SnapshotId> = (27..=31)
        .map(|d| Utc.with_ymd_and_hms(2024, 1, d, 12, 0, 0).unwrap())
        .chain((1..=5).map(|d| Utc.with_ymd_and_hms(2024, 2, d, 12, 0, 0).unwrap()))
        .map(SnapshotId::new)
        .collect();
    for id in &days {
        backend.insert_sealed(&alice.history, *id);
    }
    let stuck = days[0];
    backend.fail_delete(alice.snapshot_path(&stuck));

    let log = Arc::new(MemoryEventLog::new());
    let retention = RetentionServiceImpl::builder()
        .backend(backend.clone())
        .accounts(Arc::new(
            StaticAccountRepo::builder().accounts(vec![alice.clone()]).build(),
        ))
        .events(EventRecorder::new(log.clone()))
        .clock(feb_5)
        .build();

    let report = retention.sweep_account(&alice).await.unwrap();
    let kept = vec![days[1], days[4], days[8], days[9]];
    assert_eq!(report.retained, kept);
    assert_eq!(report.deleted.len(), 5);
    assert_eq!(report.failed, vec![stuck]);
    assert!(log.events().iter().any(|e| matches!(
        e.kind,
        EventKind::RetentionDeleteFailed { snapshot, .. } if snapshot == stuck
    )));

    let remaining: Vec<_> = backend
        .list_snapshots(&alice.history)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(remaining, vec![stuck, days[1], days[4], days[8], days[9]]);

    let reports = retention.sweep_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    let (name, again) = &reports[0];
    assert_eq!(name, "alice");
    assert_eq!(again.retained, kept);
    assert!(again.deleted.is_empty());
    assert_eq!(again.failed, vec![stuck]);
}
