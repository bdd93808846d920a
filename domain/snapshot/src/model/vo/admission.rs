use serde::{Deserialize, Serialize};

/// Outcome of the quota gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Allow,
    /// At or above 90% of the limit; the snapshot still proceeds.
    Warn,
    /// At or above the limit; no snapshot is taken.
    Deny,
}

/// A quota decision together with the figures it was made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub verdict: Verdict,
    pub usage_bytes: Option<u64>,
    pub limit_bytes: Option<u64>,
}

impl Admission {
    pub fn unlimited() -> Self {
        Self {
            verdict: Verdict::Allow,
            usage_bytes: None,
            limit_bytes: None,
        }
    }

    /// Classifies `usage` against `limit`. Integer arithmetic keeps the 90% boundary exact.
    pub fn evaluate(usage: u64, limit: u64) -> Self {
        let verdict = if usage >= limit {
            Verdict::Deny
        } else if u128::from(usage) * 10 >= u128::from(limit) * 9 {
            Verdict::Warn
        } else {
            Verdict::Allow
        };
        Self {
            verdict,
            usage_bytes: Some(usage),
            limit_bytes: Some(limit),
        }
    }

    pub fn is_denied(&self) -> bool {
        self.verdict == Verdict::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        assert_eq!(Admission::evaluate(899, 1000).verdict, Verdict::Allow);
        assert_eq!(Admission::evaluate(900, 1000).verdict, Verdict::Warn);
        assert_eq!(Admission::evaluate(99_999, 100_000).verdict, Verdict::Warn);
        assert_eq!(Admission::evaluate(100_000, 100_000).verdict, Verdict::Deny);
        assert_eq!(Admission::evaluate(100_001, 100_000).verdict, Verdict::Deny);
    }

    #[test]
    fn test_zero_limit_denies() {
        assert!(Admission::evaluate(0, 0).is_denied());
    }

    #[test]
    fn test_no_overflow_near_max() {
        assert_eq!(Admission::evaluate(u64::MAX - 1, u64::MAX).verdict, Verdict::Warn);
    }
}
