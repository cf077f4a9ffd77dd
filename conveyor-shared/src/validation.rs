//! Input validation for task definitions and identifiers.
//!
//! Explicit checks returning `ConveyorResult`, with named constants for
//! every limit. Opaque JSON fields (payload, metadata, tags, extra) are
//! never inspected structurally, only bounded in size.

use crate::constants::{CREATED_SKEW_MINUTES, MAX_DEADLINE_DAYS};
use crate::errors::{ConveyorError, ConveyorResult};
use crate::ids;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Maximum serialized size for any opaque JSON field (1MB).
pub const MAX_JSON_SIZE_BYTES: usize = 1024 * 1024;

/// Maximum number of routes on a task.
pub const MAX_ROUTES: usize = 10;

/// Maximum length of a single route. A route is republished as the CC
/// routing key `route.<r>`, and routing keys are capped at 255 bytes.
pub const MAX_ROUTE_LENGTH: usize = 249;

/// Maximum number of scopes carried by a task.
pub const MAX_SCOPES: usize = 128;

/// Maximum number of dependencies per task.
pub const MAX_DEPENDENCIES: usize = 100;

pub fn validate_slug_id(id: &str, field: &str) -> ConveyorResult<()> {
    if ids::is_valid_slug_id(id) {
        Ok(())
    } else {
        Err(ConveyorError::InvalidInput(format!(
            "{field} '{id}' is not a valid slug identifier"
        )))
    }
}

pub fn validate_identifier(id: &str, field: &str) -> ConveyorResult<()> {
    if ids::is_valid_identifier(id) {
        Ok(())
    } else {
        Err(ConveyorError::InvalidInput(format!(
            "{field} '{id}' must match ^[a-zA-Z0-9-_]{{1,38}}$"
        )))
    }
}

pub fn validate_artifact_name(name: &str) -> ConveyorResult<()> {
    if ids::is_valid_artifact_name(name) {
        Ok(())
    } else {
        Err(ConveyorError::InvalidInput(format!(
            "artifact name {name:?} must be non-empty printable ASCII"
        )))
    }
}

/// Scopes ending in `**` are rejected: a double-star suffix would
/// escalate into the scope-expansion wildcard when forwarded.
pub fn validate_scopes(scopes: &[String]) -> ConveyorResult<()> {
    if scopes.len() > MAX_SCOPES {
        return Err(ConveyorError::InvalidInput(format!(
            "too many scopes: {} (max: {MAX_SCOPES})",
            scopes.len()
        )));
    }
    for scope in scopes {
        if scope.ends_with("**") {
            return Err(ConveyorError::InvalidInput(format!(
                "scope '{scope}' ends with '**'"
            )));
        }
    }
    Ok(())
}

/// Every route becomes a CC routing key on each event for the task;
/// bound both the fan-out and the key length.
pub fn validate_routes(routes: &[String]) -> ConveyorResult<()> {
    if routes.len() > MAX_ROUTES {
        return Err(ConveyorError::InvalidInput(format!(
            "too many routes: {} (max: {MAX_ROUTES})",
            routes.len()
        )));
    }
    for route in routes {
        if route.is_empty() {
            return Err(ConveyorError::InvalidInput(
                "routes must not be empty".to_string(),
            ));
        }
        if route.len() > MAX_ROUTE_LENGTH {
            return Err(ConveyorError::InvalidInput(format!(
                "route is too long: {} bytes (max: {MAX_ROUTE_LENGTH})",
                route.len()
            )));
        }
    }
    Ok(())
}

/// Validate the created/deadline/expires timing window.
///
/// `created` must be within the allowed skew of `now`; `deadline` must
/// be in the future and no further out than the deadline horizon;
/// `expires`, when given, must not precede `deadline`.
pub fn validate_timing(
    created: DateTime<Utc>,
    deadline: DateTime<Utc>,
    expires: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ConveyorResult<()> {
    let skew = Duration::minutes(CREATED_SKEW_MINUTES);
    if created < now - skew || created > now + skew {
        return Err(ConveyorError::InvalidInput(format!(
            "created ({created}) must be within {CREATED_SKEW_MINUTES} minutes of the current time"
        )));
    }
    if deadline <= now {
        return Err(ConveyorError::InvalidInput(format!(
            "deadline ({deadline}) is in the past"
        )));
    }
    let horizon = Duration::days(MAX_DEADLINE_DAYS) + skew;
    if deadline - created > horizon {
        return Err(ConveyorError::InvalidInput(format!(
            "deadline ({deadline}) is more than {MAX_DEADLINE_DAYS} days after created ({created})"
        )));
    }
    if let Some(expires) = expires {
        if expires < deadline {
            return Err(ConveyorError::InvalidInput(format!(
                "expires ({expires}) precedes deadline ({deadline})"
            )));
        }
    }
    Ok(())
}

/// Bound the serialized size of an opaque JSON property.
pub fn validate_opaque_json(value: &Value, field: &str) -> ConveyorResult<()> {
    let serialized = serde_json::to_string(value)
        .map_err(|e| ConveyorError::InvalidInput(format!("{field} is not valid JSON: {e}")))?;
    if serialized.len() > MAX_JSON_SIZE_BYTES {
        return Err(ConveyorError::InvalidInput(format!(
            "{field} too large: {} bytes (max: {MAX_JSON_SIZE_BYTES})",
            serialized.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_star_scopes_are_rejected() {
        assert!(validate_scopes(&["queue:get-artifact:*".to_string()]).is_ok());
        assert!(validate_scopes(&["queue:**".to_string()]).is_err());
    }

    #[test]
    fn routes_are_bounded_in_count_and_length() {
        assert!(validate_routes(&["index.project.main".to_string()]).is_ok());
        assert!(validate_routes(&[]).is_ok());
        let too_many: Vec<String> = (0..=MAX_ROUTES).map(|i| format!("route-{i}")).collect();
        assert!(validate_routes(&too_many).is_err());
        assert!(validate_routes(&[String::new()]).is_err());
        assert!(validate_routes(&["r".repeat(MAX_ROUTE_LENGTH + 1)]).is_err());
        assert!(validate_routes(&["r".repeat(MAX_ROUTE_LENGTH)]).is_ok());
    }

    #[test]
    fn created_skew_window_is_enforced() {
        let now = Utc::now();
        let deadline = now + Duration::hours(1);
        assert!(validate_timing(now, deadline, None, now).is_ok());
        assert!(validate_timing(now - Duration::minutes(20), deadline, None, now).is_err());
        assert!(validate_timing(now + Duration::minutes(20), deadline, None, now).is_err());
    }

    #[test]
    fn deadline_must_be_future_and_bounded() {
        let now = Utc::now();
        assert!(validate_timing(now, now - Duration::seconds(1), None, now).is_err());
        assert!(validate_timing(now, now + Duration::days(6), None, now).is_err());
        assert!(validate_timing(now, now + Duration::days(5), None, now).is_ok());
    }

    #[test]
    fn expires_must_not_precede_deadline() {
        let now = Utc::now();
        let deadline = now + Duration::hours(2);
        assert!(validate_timing(now, deadline, Some(deadline), now).is_ok());
        assert!(validate_timing(now, deadline, Some(now + Duration::hours(1)), now).is_err());
    }
}
