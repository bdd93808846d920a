use serde::{Deserialize, Serialize};

/// How many snapshots an account keeps over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Delete everything older than `max_age_days`.
    Age { max_age_days: u32 },
    /// Grandfather-father-son: keep bounded counts of daily, weekly and monthly representatives.
    Generational {
        #[serde(default)]
        daily: u32,
        #[serde(default)]
        weekly: u32,
        #[serde(default)]
        monthly: u32,
    },
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::Generational {
            daily: 7,
            weekly: 4,
            monthly: 6,
        }
    }
}

impl RetentionPolicy {
    /// A policy that would delete every snapshot is treated as misconfigured.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Age { max_age_days } => *max_age_days > 0,
            Self::Generational {
                daily,
                weekly,
                monthly,
            } => *daily > 0 || *weekly > 0 || *monthly > 0,
        }
    }

    /// `account` override if present and valid, else `global`, else the built-in default.
    pub fn resolve(account: Option<&RetentionPolicy>, global: &RetentionPolicy) -> RetentionPolicy {
        match account {
            Some(policy) if policy.is_valid() => *policy,
            _ if global.is_valid() => *global,
            _ => Self::default(),
        }
    }
}

/// Quota and retention in force for one account after override resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePolicy {
    pub quota_bytes: Option<u64>,
    pub retention: RetentionPolicy,
}
