/// Appeal endpoints
///
/// Appeals run a fixed lifecycle: submitted, under_review, then
/// approved or denied. Approval reverses the appealed action in the
/// same transaction, so callers never observe an approved appeal with
/// the sanction still standing.
use crate::{
    appeals::{Appeal, AppealStatus},
    context::AppContext,
    error::{EngineError, EngineResult},
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Query parameters for listing appeals
#[derive(Debug, Deserialize)]
pub struct ListAppealsParams {
    /// Filter to one user's appeals
    pub user_id: Option<String>,
    /// Lifecycle status to list (default: submitted, the review queue)
    pub status: Option<String>,
    /// Maximum entries (default: 50, max: 500)
    pub limit: Option<i64>,
}

/// Request body for submitting an appeal
#[derive(Debug, Deserialize)]
pub struct SubmitAppealRequest {
    pub action_id: String,
    pub user_id: String,
    pub reason: String,
}

/// Request body for starting a review
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub reviewer: String,
}

/// Request body for resolving an appeal
#[derive(Debug, Deserialize)]
pub struct ResolveAppealRequest {
    pub approve: bool,
    pub reviewer: String,
    #[serde(default)]
    pub notes: String,
}

/// List appeals by user or by lifecycle status
///
/// Without parameters this returns the submitted queue in FIFO order,
/// which is what a reviewer works through.
pub async fn list_appeals(
    State(ctx): State<AppContext>,
    Query(params): Query<ListAppealsParams>,
) -> EngineResult<Json<Vec<Appeal>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let appeals = match &params.user_id {
        Some(user_id) => ctx.appeals.list_for_user(user_id, limit).await?,
        None => {
            let status = match &params.status {
                Some(s) => AppealStatus::from_str(s)?,
                None => AppealStatus::Submitted,
            };
            ctx.appeals.list_by_status(status, limit).await?
        }
    };

    Ok(Json(appeals))
}

/// Submit an appeal against an enforcement action
pub async fn submit_appeal(
    State(ctx): State<AppContext>,
    Json(body): Json<SubmitAppealRequest>,
) -> EngineResult<Json<Appeal>> {
    let appeal = ctx
        .appeals
        .submit(&body.action_id, &body.user_id, &body.reason)
        .await?;

    ctx.audit
        .record(
            &appeal.user_id,
            "appeal.submit",
            "appeal",
            &appeal.id,
            serde_json::json!({
                "enforcement_action_id": appeal.enforcement_action_id,
            }),
        )
        .await?;

    Ok(Json(appeal))
}

/// Claim an appeal for review
pub async fn review_appeal(
    State(ctx): State<AppContext>,
    Path(appeal_id): Path<String>,
    Json(body): Json<ReviewRequest>,
) -> EngineResult<Json<Appeal>> {
    if body.reviewer.trim().is_empty() {
        return Err(EngineError::Validation("reviewer is required".to_string()));
    }

    let appeal = ctx.appeals.begin_review(&appeal_id, &body.reviewer).await?;

    ctx.audit
        .record(
            &body.reviewer,
            "appeal.review",
            "appeal",
            &appeal.id,
            serde_json::json!({
                "enforcement_action_id": appeal.enforcement_action_id,
            }),
        )
        .await?;

    Ok(Json(appeal))
}

/// Resolve an appeal
///
/// Approving reverses the underlying action; that reversal gets its
/// own audit entry so the action's trail is complete on its own.
pub async fn resolve_appeal(
    State(ctx): State<AppContext>,
    Path(appeal_id): Path<String>,
    Json(body): Json<ResolveAppealRequest>,
) -> EngineResult<Json<Appeal>> {
    if body.reviewer.trim().is_empty() {
        return Err(EngineError::Validation("reviewer is required".to_string()));
    }

    let appeal = ctx
        .appeals
        .resolve(&appeal_id, body.approve, &body.reviewer, &body.notes)
        .await?;

    ctx.audit
        .record(
            &body.reviewer,
            "appeal.resolve",
            "appeal",
            &appeal.id,
            serde_json::json!({
                "enforcement_action_id": appeal.enforcement_action_id,
                "outcome": appeal.status.as_str(),
                "notes": body.notes,
            }),
        )
        .await?;

    if appeal.status == AppealStatus::Approved {
        ctx.audit
            .record(
                &body.reviewer,
                "action.reverse",
                "enforcement_action",
                &appeal.enforcement_action_id,
                serde_json::json!({
                    "appeal_id": appeal.id,
                    "user_id": appeal.user_id,
                }),
            )
            .await?;
    }

    Ok(Json(appeal))
}

/// Build appeal routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/appeals", get(list_appeals).post(submit_appeal))
        .route("/api/appeals/:id/review", post(review_appeal))
        .route("/api/appeals/:id/resolve", post(resolve_appeal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_deserialization() {
        let json = r#"{
            "action_id": "act-1",
            "user_id": "u-9",
            "reason": "The flagged transfer was a family payment"
        }"#;
        let body: SubmitAppealRequest = serde_json::from_str(json).unwrap();

        assert_eq!(body.action_id, "act-1");
        assert_eq!(body.user_id, "u-9");
    }

    #[test]
    fn test_resolve_request_defaults_notes() {
        let json = r#"{"approve": true, "reviewer": "lead-1"}"#;
        let body: ResolveAppealRequest = serde_json::from_str(json).unwrap();

        assert!(body.approve);
        assert!(body.notes.is_empty());
    }

    #[test]
    fn test_list_params_status_parsing() {
        let params: ListAppealsParams =
            serde_json::from_str(r#"{"status": "under_review"}"#).unwrap();

        let status = AppealStatus::from_str(params.status.as_deref().unwrap()).unwrap();
        assert_eq!(status, AppealStatus::UnderReview);
    }
}
