//! System constants and core enums.
//!
//! Operational boundaries of the queue: run-count ceilings, timing
//! windows, priority buckets and event topic names. Values here are
//! authoritative; configuration may tune durations but never these.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of runs a single task may accumulate, including
/// retries and reruns.
pub const MAX_RUNS_ALLOWED: usize = 50;

/// Size of the per-worker ring buffer of recently claimed runs.
pub const WORKER_RECENT_TASKS: usize = 20;

/// Long-poll ceiling for `claimWork`, in seconds.
pub const CLAIM_LONG_POLL_SECONDS: u64 = 20;

/// The approximate pending count may be served from cache for this long.
pub const PENDING_COUNT_CACHE_SECONDS: u64 = 20;

/// Allowed clock skew on `created`, in minutes, in either direction.
pub const CREATED_SKEW_MINUTES: i64 = 15;

/// Maximum distance between `created` and `deadline`, in days
/// (skew allowance on top, see [`CREATED_SKEW_MINUTES`]).
pub const MAX_DEADLINE_DAYS: i64 = 5;

/// When `expires` is omitted it defaults to `deadline` plus this many days.
pub const DEFAULT_EXPIRES_DAYS_AFTER_DEADLINE: i64 = 365;

/// Event topics published by the core.
pub mod topics {
    pub const TASK_DEFINED: &str = "task-defined";
    pub const TASK_PENDING: &str = "task-pending";
    pub const TASK_RUNNING: &str = "task-running";
    pub const TASK_COMPLETED: &str = "task-completed";
    pub const TASK_FAILED: &str = "task-failed";
    pub const TASK_EXCEPTION: &str = "task-exception";
    pub const TASK_GROUP_RESOLVED: &str = "task-group-resolved";
    pub const ARTIFACT_CREATED: &str = "artifact-created";
}

/// Dispatch priority buckets, highest first.
///
/// Declaration order is dispatch order: the claim loop drains these
/// strictly top to bottom. The legacy alias `normal` deserializes as
/// `lowest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Highest,
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
    #[serde(alias = "normal")]
    Lowest,
}

impl Priority {
    /// All buckets in strict dispatch order.
    pub const ALL: [Priority; 7] = [
        Priority::Highest,
        Priority::VeryHigh,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::VeryLow,
        Priority::Lowest,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Highest => "highest",
            Self::VeryHigh => "very-high",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very-low",
            Self::Lowest => "lowest",
        }
    }

    /// Priority levels that satisfy a scope check for this priority:
    /// the prefix of the dispatch order from `highest` down to and
    /// including `self`. A caller holding a scope for any of them may
    /// create tasks at this priority.
    pub fn satisfying_levels(&self) -> &'static [Priority] {
        let end = Priority::ALL.iter().position(|p| p == self).unwrap_or(6);
        &Priority::ALL[..=end]
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Lowest
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "highest" => Ok(Self::Highest),
            "very-high" => Ok(Self::VeryHigh),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "very-low" => Ok(Self::VeryLow),
            "lowest" | "normal" => Ok(Self::Lowest),
            _ => Err(format!("Invalid priority: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_order_is_highest_first() {
        assert!(Priority::Highest < Priority::Lowest);
        assert_eq!(Priority::ALL[0], Priority::Highest);
        assert_eq!(Priority::ALL[6], Priority::Lowest);
    }

    #[test]
    fn normal_is_an_alias_for_lowest() {
        let p: Priority = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(p, Priority::Lowest);
        assert_eq!("normal".parse::<Priority>().unwrap(), Priority::Lowest);
        // Serialization is always the canonical spelling.
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"lowest\"");
    }

    #[test]
    fn satisfying_levels_are_a_prefix() {
        assert_eq!(Priority::Highest.satisfying_levels(), &[Priority::Highest]);
        assert_eq!(
            Priority::High.satisfying_levels(),
            &[Priority::Highest, Priority::VeryHigh, Priority::High]
        );
        assert_eq!(Priority::Lowest.satisfying_levels().len(), 7);
    }
}
