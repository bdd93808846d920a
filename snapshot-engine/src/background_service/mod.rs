pub mod health_runner;
pub mod retention_runner;
pub mod workspace_watch_runner;

/// A long-running task started once by the server.
#[async_trait::async_trait]
pub trait BackgroundService: Send + Sync {
    async fn run(&self);
}

pub mod prelude {
    #[rustfmt::skip]
    pub use super::{
        BackgroundService,
        health_runner::HealthRunner,
        retention_runner::RetentionRunner,
        workspace_watch_runner::WorkspaceWatchRunner,
    };
}
