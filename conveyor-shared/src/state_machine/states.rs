use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state definitions.
///
/// A run moves pending -> running -> {completed, failed, exception}.
/// Terminal states are absorbing for that run; retries and reruns append
/// a new run instead of mutating a resolved one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    /// Waiting on the pending queue for a worker.
    Pending,
    /// Claimed by a worker, claim bounded by takenUntil.
    Running,
    /// Resolved successfully.
    Completed,
    /// Resolved unsuccessfully by the worker.
    Failed,
    /// Resolved without a verdict from the worker: cancellation,
    /// expiration, deadline, or an infrastructure failure.
    Exception,
}

impl RunState {
    /// Terminal states admit no further transitions for this run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Exception)
    }

    /// A run holding a claim.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Exception => write!(f, "exception"),
        }
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "exception" => Ok(Self::Exception),
            _ => Err(format!("Invalid run state: {s}")),
        }
    }
}

/// Why a run was appended to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCreated {
    /// Dependencies satisfied (or none) at creation or scheduling.
    Scheduled,
    /// Automatic retry after a claim expired.
    Retry,
    /// Automatic retry after the worker reported a transient exception.
    TaskRetry,
    /// Explicit rerun of a resolved task.
    Rerun,
    /// Synthetic run recording a resolution for a task that never ran.
    Exception,
}

impl fmt::Display for ReasonCreated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Retry => write!(f, "retry"),
            Self::TaskRetry => write!(f, "task-retry"),
            Self::Rerun => write!(f, "rerun"),
            Self::Exception => write!(f, "exception"),
        }
    }
}

/// How a run was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonResolved {
    Completed,
    Failed,
    DeadlineExceeded,
    Canceled,
    Superseded,
    ClaimExpired,
    WorkerShutdown,
    MalformedPayload,
    ResourceUnavailable,
    InternalError,
    IntermittentTask,
}

impl ReasonResolved {
    /// Exception reasons that consume a retry instead of resolving the
    /// task, while retries remain.
    pub fn is_retriable_exception(&self) -> bool {
        matches!(self, Self::WorkerShutdown | Self::IntermittentTask)
    }

    /// The run state this resolution reason implies.
    pub fn run_state(&self) -> RunState {
        match self {
            Self::Completed => RunState::Completed,
            Self::Failed => RunState::Failed,
            _ => RunState::Exception,
        }
    }
}

impl fmt::Display for ReasonResolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::DeadlineExceeded => write!(f, "deadline-exceeded"),
            Self::Canceled => write!(f, "canceled"),
            Self::Superseded => write!(f, "superseded"),
            Self::ClaimExpired => write!(f, "claim-expired"),
            Self::WorkerShutdown => write!(f, "worker-shutdown"),
            Self::MalformedPayload => write!(f, "malformed-payload"),
            Self::ResourceUnavailable => write!(f, "resource-unavailable"),
            Self::InternalError => write!(f, "internal-error"),
            Self::IntermittentTask => write!(f, "intermittent-task"),
        }
    }
}

/// Task state derived from the run sequence: `unscheduled` with no runs,
/// otherwise the state of the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Unscheduled,
    Pending,
    Running,
    Completed,
    Failed,
    Exception,
}

impl TaskState {
    pub fn from_last_run(state: Option<RunState>) -> Self {
        match state {
            None => Self::Unscheduled,
            Some(RunState::Pending) => Self::Pending,
            Some(RunState::Running) => Self::Running,
            Some(RunState::Completed) => Self::Completed,
            Some(RunState::Failed) => Self::Failed,
            Some(RunState::Exception) => Self::Exception,
        }
    }

    /// A resolved task has a terminal last run.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Exception)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unscheduled => write!(f, "unscheduled"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Exception => write!(f, "exception"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_absorbing() {
        assert!(!RunState::Pending.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Exception.is_terminal());
    }

    #[test]
    fn wire_form_is_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ReasonResolved::DeadlineExceeded).unwrap(),
            "\"deadline-exceeded\""
        );
        assert_eq!(
            serde_json::from_str::<ReasonCreated>("\"task-retry\"").unwrap(),
            ReasonCreated::TaskRetry
        );
    }

    #[test]
    fn derived_task_state_collapses_runs() {
        assert_eq!(TaskState::from_last_run(None), TaskState::Unscheduled);
        assert_eq!(
            TaskState::from_last_run(Some(RunState::Running)),
            TaskState::Running
        );
        assert!(TaskState::from_last_run(Some(RunState::Exception)).is_resolved());
    }

    #[test]
    fn retriable_exceptions_are_exactly_two() {
        for reason in [
            ReasonResolved::WorkerShutdown,
            ReasonResolved::IntermittentTask,
        ] {
            assert!(reason.is_retriable_exception());
        }
        assert!(!ReasonResolved::ClaimExpired.is_retriable_exception());
        assert!(!ReasonResolved::Canceled.is_retriable_exception());
    }
}
