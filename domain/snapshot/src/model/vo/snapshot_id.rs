use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const NAME_FORMAT: &str = "@GMT-%Y.%m.%d-%H.%M.%S";

/// Identifier of a sealed snapshot.
///
/// The creation time doubles as the identifier and the sort key. It is kept at
/// second resolution and rendered in the shadow-copy form `@GMT-YYYY.MM.DD-HH.MM.SS`,
/// which is also the snapshot's directory name inside the account history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(DateTime<Utc>);

impl SnapshotId {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(0))
    }

    /// Next identifier at `now`, bumped one second past `last` if the clock
    /// has not moved beyond it.
    pub fn next_after(now: DateTime<Utc>, last: Option<&SnapshotId>) -> Self {
        let candidate = Self::new(now);
        match last {
            Some(last) if candidate <= *last => Self(last.0 + Duration::seconds(1)),
            _ => candidate,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn name(&self) -> String {
        self.0.format(NAME_FORMAT).to_string()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for SnapshotId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let naive = NaiveDateTime::parse_from_str(s, NAME_FORMAT)
            .with_context(|| format!("`{s}` is not a snapshot name"))?;
        Ok(Self(naive.and_utc()))
    }
}

impl Serialize for SnapshotId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for SnapshotId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
