use std::sync::Arc;

use anyhow::Context;
use domain_snapshot::service::{
    ActivityTracker, QuotaAdmissionService, RetentionService, SnapshotOrchestratorService,
    StorageBackend,
};
use infrastructure_storage::{
    backend::{BtrfsBackend, LocalFsBackend},
    FileMarkerRepo, JsonLinesEventLog, StaticAccountRepo,
};
use service_snapshot::{
    ActivityTrackerImpl, EventRecorder, Health, HealthMonitor, QuotaAdmissionServiceImpl,
    RetentionServiceImpl, SnapshotOrchestratorImpl,
};

use crate::background_service::prelude::*;
use crate::config::{BackendKind, EngineConfig};

pub async fn run(config: EngineConfig) -> anyhow::Result<()> {
    let accounts = config.accounts();
    if accounts.is_empty() {
        tracing::warn!("No usable account configured, the engine will stay idle");
    }
    tokio::fs::create_dir_all(&config.state_dir)
        .await
        .with_context(|| format!("create state directory {:?}", config.state_dir))?;

    let backend: Arc<dyn StorageBackend> = match config.backend.kind {
        BackendKind::Btrfs => Arc::new(
            BtrfsBackend::builder()
                .program(config.backend.btrfs_program.as_str())
                .root(config.backend.root.as_path())
                .build(),
        ),
        BackendKind::Local => Arc::new(
            LocalFsBackend::builder()
                .root(config.backend.root.as_path())
                .build(),
        ),
    };
    let health = Arc::new(HealthMonitor::new(backend.clone()));
    if let Health::Degraded { reason } = health.check().await {
        tracing::warn!("Starting with a degraded storage backend: {reason}");
    }

    let events = EventRecorder::new(Arc::new(
        JsonLinesEventLog::builder().path(config.event_log_path()).build(),
    ));
    let account_repo = Arc::new(
        StaticAccountRepo::builder()
            .accounts(accounts.clone())
            .global_retention(config.global_retention())
            .build(),
    );
    let tracker: Arc<dyn ActivityTracker> = Arc::new(ActivityTrackerImpl::new());
    let quota: Arc<dyn QuotaAdmissionService> = Arc::new(
        QuotaAdmissionServiceImpl::builder()
            .backend(backend.clone())
            .events(events.clone())
            .build(),
    );
    let orchestrator: Arc<dyn SnapshotOrchestratorService> = Arc::new(
        SnapshotOrchestratorImpl::builder()
            .accounts(account_repo.clone())
            .tracker(tracker)
            .quota(quota)
            .backend(backend.clone())
            .markers(Arc::new(FileMarkerRepo::builder().dir(config.marker_dir()).build()))
            .events(events.clone())
            .health(health.clone())
            .settings(config.settings())
            .build(),
    );
    let retention: Arc<dyn RetentionService> = Arc::new(
        RetentionServiceImpl::builder()
            .backend(backend)
            .accounts(account_repo)
            .events(events)
            .build(),
    );

    match orchestrator.recover().await {
        Ok(0) => {}
        Ok(discarded) => tracing::info!("Discarded {discarded} stale in-progress markers"),
        Err(e) => tracing::error!("Unable to recover in-progress markers: {e:#}"),
    }

    let services: Vec<Arc<dyn BackgroundService>> = vec![
        Arc::new(WorkspaceWatchRunner::new(
            &accounts,
            orchestrator,
            config.watch_poll_interval(),
        )),
        Arc::new(RetentionRunner::new(config.retention_interval(), retention, health.clone())),
        Arc::new(HealthRunner::new(config.health_interval(), health)),
    ];
    for service in services {
        tokio::spawn(async move { service.run().await });
    }
    tracing::info!("Snapshot engine started with {} accounts", accounts.len());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
