use dashmap::DashMap;
use domain_snapshot::service::ActivityTracker;
use tokio::time::Instant;

/// Per-account last-event timestamps. Never moves a timestamp backwards.
#[derive(Debug, Default)]
pub struct ActivityTrackerImpl {
    last: DashMap<String, Instant>,
}

impl ActivityTrackerImpl {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityTracker for ActivityTrackerImpl {
    fn record_activity(&self, account: &str, at: Instant) {
        self.last
            .entry(account.to_owned())
            .and_modify(|last| {
                if at > *last {
                    *last = at;
                }
            })
            .or_insert(at);
    }

    fn last_activity(&self, account: &str) -> Option<Instant> {
        self.last.get(account).map(|e| *e.value())
    }

    fn clear_through(&self, account: &str, upto: Instant) -> bool {
        match self.last.remove_if(account, |_, last| *last <= upto) {
            Some(_) => true,
            None => !self.last.contains_key(account),
        }
    }
}
