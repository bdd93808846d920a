use std::sync::{Arc, Mutex, PoisonError};

use domain_snapshot::service::StorageBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// The storage backend is unreachable; nothing can be snapshotted or pruned.
    Degraded { reason: String },
}

/// Tracks whether the storage backend answers at all.
pub struct HealthMonitor {
    backend: Arc<dyn StorageBackend>,
    state: Mutex<Health>,
}

impl HealthMonitor {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(Health::Healthy),
        }
    }

    /// Probe the backend and update the signal. Transitions are logged once.
    pub async fn check(&self) -> Health {
        let probed = match self.backend.probe().await {
            Ok(()) => Health::Healthy,
            Err(e) => Health::Degraded {
                reason: format!("{e:#}"),
            },
        };
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match (&*state, &probed) {
            (Health::Healthy, Health::Degraded { reason }) => {
                tracing::error!("Storage backend degraded: {reason}")
            }
            (Health::Degraded { .. }, Health::Healthy) => {
                tracing::info!("Storage backend recovered")
            }
            _ => {}
        }
        *state = probed.clone();
        probed
    }

    pub fn health(&self) -> Health {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.health(), Health::Degraded { .. })
    }
}

#[cfg(test)]
mod tests {
    use domain_snapshot::mock::MockStorageBackend;

    use super::*;

    #[tokio::test]
    async fn degrade_and_recover() {
        let mut backend = MockStorageBackend::new();
        let mut seq = mockall::Sequence::new();
        backend
            .expect_probe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(anyhow::anyhow!("no such device")));
        backend.expect_probe().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        let monitor = HealthMonitor::new(Arc::new(backend));

        assert!(!monitor.is_degraded());
        assert!(matches!(monitor.check().await, Health::Degraded { .. }));
        assert!(monitor.is_degraded());
        assert_eq!(monitor.check().await, Health::Healthy);
        assert!(!monitor.is_degraded());
    }
}
