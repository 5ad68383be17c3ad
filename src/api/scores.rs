/// Risk score endpoints
///
/// Recompute is the synchronous path: score the user now, run the
/// enforcement ladder on the result, and return both. Reads go through
/// the score cache when one is configured.
use crate::{
    context::AppContext,
    enforcement::EnforcementAction,
    error::{EngineError, EngineResult},
    scoring::{RiskScore, ScoreOutcome},
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Request body for a manual recompute
#[derive(Debug, Deserialize)]
pub struct RecomputeRequest {
    /// Operator requesting the recompute (default: "operator")
    pub requested_by: Option<String>,
}

/// Response for a recompute: the scoring outcome plus whatever
/// enforcement it triggered
#[derive(Debug, Serialize)]
pub struct RecomputeResponse {
    pub outcome: ScoreOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<EnforcementAction>,
}

/// Query parameters for score history
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Maximum entries to return (default: 50, max: 500)
    pub limit: Option<i64>,
}

/// Recompute a user's score and evaluate enforcement
pub async fn recompute_score(
    State(ctx): State<AppContext>,
    Path(user_id): Path<String>,
    body: Option<Json<RecomputeRequest>>,
) -> EngineResult<Json<RecomputeResponse>> {
    let outcome = ctx.scorer.compute(&user_id).await?;
    ctx.invalidate_score_cache(&user_id).await;

    let action = ctx.enforcement.evaluate(&outcome).await?;

    let actor = body
        .and_then(|Json(b)| b.requested_by)
        .unwrap_or_else(|| "operator".to_string());
    ctx.audit
        .record(
            &actor,
            "score.recompute",
            "user",
            &user_id,
            serde_json::json!({
                "score": outcome.score.score,
                "tier": outcome.score.tier.as_str(),
                "delta": outcome.delta,
                "action_id": action.as_ref().map(|a| a.id.clone()),
            }),
        )
        .await?;

    Ok(Json(RecomputeResponse { outcome, action }))
}

/// Fetch a user's latest score
pub async fn latest_score(
    State(ctx): State<AppContext>,
    Path(user_id): Path<String>,
) -> EngineResult<Json<RiskScore>> {
    match ctx.latest_score(&user_id).await? {
        Some(score) => Ok(Json(score)),
        None => Err(EngineError::NotFound(format!(
            "No score recorded for user {}",
            user_id
        ))),
    }
}

/// Fetch a user's score history, newest first
pub async fn score_history(
    State(ctx): State<AppContext>,
    Path(user_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> EngineResult<Json<Vec<RiskScore>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let history = ctx.scores.history(&user_id, limit).await?;
    Ok(Json(history))
}

/// Build score routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/users/:id/score/recompute", post(recompute_score))
        .route("/api/users/:id/score", get(latest_score))
        .route("/api/users/:id/score/history", get(score_history))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recompute_request_deserialization() {
        let body: RecomputeRequest = serde_json::from_str("{}").unwrap();
        assert!(body.requested_by.is_none());

        let body: RecomputeRequest =
            serde_json::from_str(r#"{"requested_by": "analyst-4"}"#).unwrap();
        assert_eq!(body.requested_by.as_deref(), Some("analyst-4"));
    }

    #[test]
    fn test_history_limit_clamping() {
        let clamp = |limit: Option<i64>| limit.unwrap_or(50).clamp(1, 500);

        assert_eq!(clamp(None), 50);
        assert_eq!(clamp(Some(0)), 1);
        assert_eq!(clamp(Some(10_000)), 500);
        assert_eq!(clamp(Some(25)), 25);
    }
}
