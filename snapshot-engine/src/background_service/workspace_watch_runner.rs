use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use domain_snapshot::{model::entity::Account, service::SnapshotOrchestratorService};
use notify::{Config, Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};

use super::BackgroundService;

/// Feeds filesystem events under the workspaces to the orchestrator.
pub struct WorkspaceWatchRunner {
    service: Arc<dyn SnapshotOrchestratorService>,
    router: WorkspaceRouter,
    poll_interval: Option<Duration>,
}

#[async_trait::async_trait]
impl BackgroundService for WorkspaceWatchRunner {
    async fn run(&self) {
        let (sender, receiver) = flume::unbounded::<notify::Result<Event>>();
        let mut watcher = match self.watcher(FlumeEventHandler(sender)) {
            Ok(x) => x,
            Err(e) => {
                tracing::error!("Unable to start workspace watcher: {e}");
                return;
            }
        };
        for workspace in self.router.workspaces() {
            if let Err(e) = watcher.watch(workspace, RecursiveMode::Recursive) {
                tracing::error!("Unable to watch {workspace:?}: {e}");
            }
        }

        loop {
            match receiver.recv_async().await {
                Ok(Ok(event)) => self.dispatch(event).await,
                Ok(Err(e)) => tracing::error!("Watcher error: {e}"),
                Err(e) => {
                    tracing::error!("Watcher receive event error: {e}");
                    return;
                }
            }
        }
    }
}

impl WorkspaceWatchRunner {
    pub fn new(
        accounts: &[Account],
        service: Arc<dyn SnapshotOrchestratorService>,
        poll_interval: Option<Duration>,
    ) -> Self {
        Self {
            service,
            router: WorkspaceRouter::new(accounts),
            poll_interval,
        }
    }

    fn watcher(&self, handler: FlumeEventHandler) -> notify::Result<Box<dyn Watcher + Send>> {
        Ok(match self.poll_interval {
            Some(interval) => Box::new(PollWatcher::new(
                handler,
                Config::default().with_poll_interval(interval),
            )?),
            None => Box::new(RecommendedWatcher::new(handler, Config::default())?),
        })
    }

    async fn dispatch(&self, event: Event) {
        if event.kind.is_access() {
            return;
        }
        tracing::trace!("{event:?}");
        for account in self.router.route_all(&event.paths) {
            match self.service.notify_activity(account).await {
                Ok(outcome) => tracing::trace!(account, "{outcome:?}"),
                Err(e) => tracing::error!(account, "Unable to record activity: {e:#}"),
            }
        }
    }
}

/// Maps a changed path to the account whose workspace holds it, longest prefix first.
struct WorkspaceRouter {
    routes: Vec<(PathBuf, String)>,
}

impl WorkspaceRouter {
    fn new(accounts: &[Account]) -> Self {
        let mut routes: Vec<_> = accounts
            .iter()
            .map(|a| (a.workspace.clone(), a.name.clone()))
            .collect();
        routes.sort_by_key(|(workspace, _)| std::cmp::Reverse(workspace.components().count()));
        Self { routes }
    }

    fn route(&self, path: &Path) -> Option<&str> {
        self.routes
            .iter()
            .find(|(workspace, _)| path.starts_with(workspace))
            .map(|(_, name)| name.as_str())
    }

    fn route_all<'a>(&'a self, paths: &[PathBuf]) -> BTreeSet<&'a str> {
        paths.iter().filter_map(|p| self.route(p)).collect()
    }

    fn workspaces(&self) -> impl Iterator<Item = &Path> {
        self.routes.iter().map(|(workspace, _)| workspace.as_path())
    }
}

struct FlumeEventHandler(flume::Sender<notify::Result<Event>>);

impl notify::EventHandler for FlumeEventHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        if let Err(e) = self.0.send(event) {
            tracing::error!("File watcher send event error. {e}")
        }
    }
}
