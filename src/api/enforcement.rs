/// Enforcement action endpoints
///
/// Reads expose a user's active action plus history. The write path is
/// for staff-created actions only; automated enforcement goes through
/// the scoring recompute path. This is also the only way a permanent
/// ban enters the system, since the engine refuses to create one.
use crate::{
    context::AppContext,
    enforcement::{EnforcementAction, NewAction},
    error::{EngineError, EngineResult},
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Query parameters for action history
#[derive(Debug, Deserialize)]
pub struct ActionHistoryParams {
    /// Maximum history entries (default: 50, max: 200)
    pub limit: Option<i64>,
}

/// A user's enforcement state: the active action and past ones
#[derive(Debug, Serialize)]
pub struct EnforcementStateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<EnforcementAction>,
    pub history: Vec<EnforcementAction>,
}

/// Fetch a user's enforcement state
pub async fn user_actions(
    State(ctx): State<AppContext>,
    Path(user_id): Path<String>,
    Query(params): Query<ActionHistoryParams>,
) -> EngineResult<Json<EnforcementStateResponse>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let active = ctx.actions.active_action(&user_id).await?;
    let history = ctx.actions.history(&user_id, limit).await?;

    Ok(Json(EnforcementStateResponse { active, history }))
}

/// Record a staff-created enforcement action
pub async fn create_action(
    State(ctx): State<AppContext>,
    Json(body): Json<NewAction>,
) -> EngineResult<Json<EnforcementAction>> {
    if body.created_by.trim().is_empty() || body.created_by == "system" {
        return Err(EngineError::Validation(
            "created_by must identify a staff member".to_string(),
        ));
    }

    let action = ctx.actions.record(body).await?;

    ctx.audit
        .record(
            &action.created_by,
            "action.create",
            "enforcement_action",
            &action.id,
            serde_json::json!({
                "user_id": action.user_id,
                "action_type": action.action_type.as_str(),
                "reason_code": action.reason_code.as_str(),
            }),
        )
        .await?;

    tracing::info!(
        action_id = %action.id,
        user_id = %action.user_id,
        action_type = action.action_type.as_str(),
        created_by = %action.created_by,
        "manual_action_created"
    );

    Ok(Json(action))
}

/// Request body for reversing an action directly (outside an appeal)
#[derive(Debug, Deserialize)]
pub struct ReverseRequest {
    pub actor: String,
    pub reason: String,
}

/// Reverse an action without an appeal
///
/// Used for operational mistakes (wrong user, misfired classifier).
/// User-initiated reversals go through the appeal flow instead.
pub async fn reverse_action(
    State(ctx): State<AppContext>,
    Path(action_id): Path<String>,
    Json(body): Json<ReverseRequest>,
) -> EngineResult<Json<EnforcementAction>> {
    if body.actor.trim().is_empty() {
        return Err(EngineError::Validation("actor is required".to_string()));
    }

    let action = ctx
        .actions
        .reverse(&action_id, &body.actor, &body.reason)
        .await?;

    ctx.audit
        .record(
            &body.actor,
            "action.reverse",
            "enforcement_action",
            &action.id,
            serde_json::json!({
                "user_id": action.user_id,
                "reason": body.reason,
                "reversed_at": action.reversed_at.unwrap_or_else(Utc::now).to_rfc3339(),
            }),
        )
        .await?;

    Ok(Json(action))
}

/// Build enforcement routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/users/:id/actions", get(user_actions))
        .route("/api/actions", post(create_action))
        .route("/api/actions/:id/reverse", post(reverse_action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::ActionType;

    #[test]
    fn test_new_action_deserialization() {
        let json = r#"{
            "user_id": "u-9",
            "action_type": "temporary_restriction",
            "reason": "Confirmed off-platform payment push",
            "reason_code": "repeat_offense",
            "triggering_tier": "high",
            "triggering_score": 74.2,
            "effective_until": null,
            "created_by": "analyst-2"
        }"#;
        let body: NewAction = serde_json::from_str(json).unwrap();

        assert_eq!(body.action_type, ActionType::TemporaryRestriction);
        assert!(body.triggering_signal_ids.is_empty());
        assert_eq!(body.created_by, "analyst-2");
    }

    #[test]
    fn test_reverse_request_deserialization() {
        let json = r#"{"actor": "lead-1", "reason": "Classifier misfire"}"#;
        let body: ReverseRequest = serde_json::from_str(json).unwrap();

        assert_eq!(body.actor, "lead-1");
        assert_eq!(body.reason, "Classifier misfire");
    }
}
