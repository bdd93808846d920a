mod activity;
mod event;
mod health;
mod orchestrator;
mod owner;
mod quota;
mod retention;

#[rustfmt::skip]
pub use {
    activity::ActivityTrackerImpl,
    event::EventRecorder,
    health::{Health, HealthMonitor},
    orchestrator::SnapshotOrchestratorImpl,
    owner::process_start_time,
    quota::QuotaAdmissionServiceImpl,
    retention::{select_retained, RetentionServiceImpl},
};
