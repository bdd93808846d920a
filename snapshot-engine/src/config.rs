use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use domain_snapshot::model::{
    entity::Account,
    vo::{OrchestratorSettings, RetentionPolicy},
};
use serde::*;

use crate::telemetry::TelemetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "EngineConfig::default_inactivity_window_secs")]
    pub inactivity_window_secs: u64,
    #[serde(default = "EngineConfig::default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "EngineConfig::default_retention_interval_secs")]
    pub retention_interval_secs: u64,
    #[serde(default = "EngineConfig::default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// Poll the workspaces instead of using kernel notifications.
    #[serde(default = "Default::default")]
    pub watch_poll_interval_secs: Option<u64>,
    #[serde(default = "EngineConfig::default_state_dir")]
    pub state_dir: PathBuf,
    /// Defaults to `<state_dir>/events.jsonl`.
    #[serde(default = "Default::default")]
    pub event_log: Option<PathBuf>,
    #[serde(default = "Default::default")]
    pub backend: BackendConfig,
    /// Global retention policy. Kept untyped so a malformed value can fall back.
    #[serde(default = "Default::default")]
    pub retention: Option<serde_json::Value>,
    #[serde(default = "Default::default")]
    pub accounts: Vec<AccountConfig>,
    #[serde(default = "Default::default")]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "BackendConfig::default_kind")]
    pub kind: BackendKind,
    /// Filesystem holding the workspaces and histories.
    #[serde(default = "BackendConfig::default_root")]
    pub root: PathBuf,
    #[serde(default = "BackendConfig::default_btrfs_program")]
    pub btrfs_program: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Btrfs,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub workspace: PathBuf,
    pub history: PathBuf,
    #[serde(default = "Default::default")]
    pub quota_bytes: Option<u64>,
    #[serde(default = "Default::default")]
    pub retention: Option<serde_json::Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: Self::default_poll_interval_secs(),
            inactivity_window_secs: Self::default_inactivity_window_secs(),
            max_wait_secs: Self::default_max_wait_secs(),
            retention_interval_secs: Self::default_retention_interval_secs(),
            health_interval_secs: Self::default_health_interval_secs(),
            watch_poll_interval_secs: Default::default(),
            state_dir: Self::default_state_dir(),
            event_log: Default::default(),
            backend: Default::default(),
            retention: Default::default(),
            accounts: Default::default(),
            telemetry: Default::default(),
        }
    }
}

impl EngineConfig {
    pub fn default_poll_interval_secs() -> u64 {
        5
    }
    pub fn default_inactivity_window_secs() -> u64 {
        60
    }
    pub fn default_max_wait_secs() -> u64 {
        1800
    }
    pub fn default_retention_interval_secs() -> u64 {
        86400
    }
    pub fn default_health_interval_secs() -> u64 {
        60
    }
    pub fn default_state_dir() -> PathBuf {
        "/var/lib/snapshot-engine".into()
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.event_log.clone().unwrap_or_else(|| self.state_dir.join("events.jsonl"))
    }

    pub fn marker_dir(&self) -> PathBuf {
        self.state_dir.join("markers")
    }

    pub fn settings(&self) -> OrchestratorSettings {
        let (settings, replaced) = OrchestratorSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            inactivity_window: Duration::from_secs(self.inactivity_window_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
        .sanitized();
        for field in replaced {
            tracing::warn!("Invalid `{field}_secs`, using the default instead");
        }
        settings
    }

    pub fn retention_interval(&self) -> Duration {
        positive_secs(
            self.retention_interval_secs,
            Self::default_retention_interval_secs(),
            "retention_interval_secs",
        )
    }

    pub fn health_interval(&self) -> Duration {
        positive_secs(
            self.health_interval_secs,
            Self::default_health_interval_secs(),
            "health_interval_secs",
        )
    }

    pub fn watch_poll_interval(&self) -> Option<Duration> {
        self.watch_poll_interval_secs
            .map(|secs| positive_secs(secs, Self::default_poll_interval_secs(), "watch_poll_interval_secs"))
    }

    pub fn global_retention(&self) -> RetentionPolicy {
        self.retention
            .as_ref()
            .and_then(|value| parse_retention(value, "global"))
            .unwrap_or_default()
    }

    /// Accounts fit to run. A broken entry is logged and left out, never fatal for the rest.
    pub fn accounts(&self) -> Vec<Account> {
        let mut names = HashSet::new();
        let mut accounts = vec![];
        for config in &self.accounts {
            let name = config.name.as_str();
            if name.is_empty() {
                tracing::error!("Skipping an account without a name");
                continue;
            }
            if !is_plain_name(name) {
                tracing::error!(account = name, "Skipping account whose name is not a plain file name");
                continue;
            }
            if !names.insert(name) {
                tracing::error!(account = name, "Skipping duplicated account");
                continue;
            }
            let account = Account {
                name: name.to_owned(),
                workspace: config.workspace.clone(),
                history: config.history.clone(),
                quota_bytes: config.quota_bytes,
                retention: config.retention.as_ref().and_then(|v| parse_retention(v, name)),
            };
            if !account.has_disjoint_paths() {
                tracing::error!(account = name, "Skipping account whose workspace and history overlap");
                continue;
            }
            if !account.workspace.is_dir() {
                tracing::error!(account = name, "Skipping account, workspace {:?} does not exist", account.workspace);
                continue;
            }
            accounts.push(account);
        }
        accounts
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: Self::default_kind(),
            root: Self::default_root(),
            btrfs_program: Self::default_btrfs_program(),
        }
    }
}

impl BackendConfig {
    pub fn default_kind() -> BackendKind {
        BackendKind::Btrfs
    }
    pub fn default_root() -> PathBuf {
        "/srv".into()
    }
    pub fn default_btrfs_program() -> String {
        "btrfs".to_string()
    }
}

/// Account names key on-disk state, so they must stay a single path component.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(first)), None) if first == name
    )
}

fn positive_secs(secs: u64, default: u64, field: &str) -> Duration {
    if secs == 0 {
        tracing::warn!("Invalid `{field}`, using the default instead");
        return Duration::from_secs(default);
    }
    Duration::from_secs(secs)
}

const GENERATIONAL_KEYS: [&str; 3] = ["daily", "weekly", "monthly"];

/// `None` when the value names both modes, neither, or a policy that keeps nothing.
fn parse_retention(value: &serde_json::Value, scope: &str) -> Option<RetentionPolicy> {
    let age = value.get("max_age_days").is_some();
    let generational = GENERATIONAL_KEYS.iter().any(|key| value.get(key).is_some());
    if age && generational {
        tracing::warn!(scope, "Retention policy names both modes, ignoring it");
        return None;
    }
    match serde_json::from_value::<RetentionPolicy>(value.clone()) {
        Ok(policy) if policy.is_valid() => Some(policy),
        Ok(policy) => {
            tracing::warn!(scope, "Retention policy {policy:?} would keep nothing, ignoring it");
            None
        }
        Err(e) => {
            tracing::warn!(scope, "Malformed retention policy, ignoring it: {e}");
            None
        }
    }
}

pub fn build_config() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = config::Config::builder().add_source(
        config::File::with_name("config")
            .required(false)
            .format(config::FileFormat::Yaml),
    );
    for arg in args.iter().skip(1) {
        if arg.ends_with("yaml") || arg.ends_with("yml") {
            config = config.add_source(
                config::File::from(std::path::Path::new(arg.as_str()))
                    .format(config::FileFormat::Yaml)
                    .required(false),
            );
        }
    }
    config = config.add_source(
        config::Environment::with_prefix("ENGINE")
            .separator("__")
            .try_parsing(true),
    );
    Ok(config.build()?.try_deserialize()?)
}
