//! Scope authorization collaborator.
//!
//! The core never evaluates scope satisfaction itself; it builds the
//! parameterized scope patterns and forwards them to an external
//! checker. The only piece of scope logic owned here is the priority
//! prefix rule: holding a scope for any priority at or above the
//! requested one is sufficient.

use async_trait::async_trait;
use conveyor_shared::constants::Priority;
use conveyor_shared::errors::{ApiError, ApiResult};

#[async_trait]
pub trait AuthChecker: Send + Sync {
    /// Succeed when the caller satisfies at least one of `candidates`.
    async fn require_any(&self, candidates: &[String]) -> ApiResult<()>;
}

/// Scope patterns that authorize creating a task at `priority` on the
/// given (provisioner, workerType): one candidate per satisfying
/// priority level, highest first.
pub fn create_task_scopes(
    priority: Priority,
    provisioner_id: &str,
    worker_type: &str,
) -> Vec<String> {
    priority
        .satisfying_levels()
        .iter()
        .map(|level| format!("queue:create-task:{level}:{provisioner_id}/{worker_type}"))
        .collect()
}

/// Permissive checker for tests and embedded deployments.
#[derive(Debug, Default)]
pub struct AllowAllAuth;

#[async_trait]
impl AuthChecker for AllowAllAuth {
    async fn require_any(&self, _candidates: &[String]) -> ApiResult<()> {
        Ok(())
    }
}

/// Checker granting a fixed scope set, for authorization tests.
#[derive(Debug, Default)]
pub struct FixedScopeAuth {
    granted: Vec<String>,
}

impl FixedScopeAuth {
    pub fn new(granted: Vec<String>) -> Self {
        Self { granted }
    }
}

#[async_trait]
impl AuthChecker for FixedScopeAuth {
    async fn require_any(&self, candidates: &[String]) -> ApiResult<()> {
        if candidates.iter().any(|c| self.granted.contains(c)) {
            Ok(())
        } else {
            Err(ApiError::AuthorizationError {
                message: format!("none of the required scopes are satisfied: {candidates:?}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_scopes_satisfy_lower_requests() {
        let scopes = create_task_scopes(Priority::Medium, "aws", "builder");
        assert_eq!(scopes.len(), 4);
        assert_eq!(scopes[0], "queue:create-task:highest:aws/builder");
        assert_eq!(scopes[3], "queue:create-task:medium:aws/builder");
    }

    #[tokio::test]
    async fn fixed_scope_auth_matches_any_candidate() {
        let auth = FixedScopeAuth::new(vec!["queue:create-task:high:aws/builder".to_string()]);
        let ok = create_task_scopes(Priority::Low, "aws", "builder");
        assert!(auth.require_any(&ok).await.is_ok());
        let denied = create_task_scopes(Priority::Highest, "aws", "builder");
        assert!(auth.require_any(&denied).await.is_err());
    }
}
