mod activity;
mod event_log;
mod orchestrator;
mod quota;
mod retention;
mod storage_backend;

#[rustfmt::skip]
pub use self::{
    activity::ActivityTracker,
    event_log::EventLog,
    orchestrator::{ActivityOutcome, SnapshotOrchestratorService},
    quota::QuotaAdmissionService,
    retention::{RetentionReport, RetentionService},
    storage_backend::StorageBackend,
};
