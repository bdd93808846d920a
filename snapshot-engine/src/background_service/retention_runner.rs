use std::sync::Arc;
use std::time::Duration;

use domain_snapshot::service::RetentionService;
use service_snapshot::{Health, HealthMonitor};
use tokio::time::{interval, MissedTickBehavior};
use tracing::Instrument;

use super::BackgroundService;

/// Sweeps every account on a fixed schedule, skipping rounds while storage is degraded.
pub struct RetentionRunner {
    service: Arc<dyn RetentionService>,
    health: Arc<HealthMonitor>,
    interval: Duration,
}

#[async_trait::async_trait]
impl BackgroundService for RetentionRunner {
    async fn run(&self) {
        let mut interval = interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.sweep().instrument(tracing::info_span!("retention_sweep")).await;
        }
    }
}

impl RetentionRunner {
    pub fn new(
        interval: Duration,
        service: Arc<dyn RetentionService>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            service,
            health,
            interval,
        }
    }

    async fn sweep(&self) {
        if let Health::Degraded { reason } = self.health.check().await {
            tracing::warn!("Skipping retention sweep, storage backend degraded: {reason}");
            return;
        }
        match self.service.sweep_all().await {
            Ok(reports) => {
                for (account, report) in reports {
                    tracing::info!(
                        account = %account,
                        "Retention kept {}, deleted {}, failed to delete {}",
                        report.retained.len(),
                        report.deleted.len(),
                        report.failed.len()
                    );
                }
            }
            Err(e) => tracing::error!("Retention sweep failed: {e:#}"),
        }
    }
}
