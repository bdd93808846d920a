use std::sync::Arc;
use std::time::Duration;

use service_snapshot::HealthMonitor;
use tokio::time::interval;

use super::BackgroundService;

pub struct HealthRunner {
    monitor: Arc<HealthMonitor>,
    interval: Duration,
}

#[async_trait::async_trait]
impl BackgroundService for HealthRunner {
    async fn run(&self) {
        let mut interval = interval(self.interval);
        loop {
            interval.tick().await;
            self.monitor.check().await;
        }
    }
}

impl HealthRunner {
    pub fn new(interval: Duration, monitor: Arc<HealthMonitor>) -> Self {
        Self { monitor, interval }
    }
}
