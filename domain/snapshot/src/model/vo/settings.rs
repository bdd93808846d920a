use std::time::Duration;

/// Timing of the debounce watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// How often a watcher re-checks the last activity.
    pub poll_interval: Duration,
    /// Quiet period after which a burst is considered finished.
    pub inactivity_window: Duration,
    /// Upper bound on how long a watcher waits under continuous writes.
    pub max_wait: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            inactivity_window: Duration::from_secs(60),
            max_wait: Duration::from_secs(1800),
        }
    }
}

impl OrchestratorSettings {
    /// Replaces values that cannot work with the defaults.
    ///
    /// Returns the sanitized settings and the names of the fields that were replaced.
    pub fn sanitized(self) -> (Self, Vec<&'static str>) {
        let defaults = Self::default();
        let mut replaced = vec![];
        let mut out = self;
        if out.poll_interval.is_zero() {
            out.poll_interval = defaults.poll_interval;
            replaced.push("poll_interval");
        }
        if out.inactivity_window.is_zero() {
            out.inactivity_window = defaults.inactivity_window;
            replaced.push("inactivity_window");
        }
        if out.max_wait < out.inactivity_window {
            out.max_wait = defaults.max_wait.max(out.inactivity_window);
            replaced.push("max_wait");
        }
        (out, replaced)
    }
}
