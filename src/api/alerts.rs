/// Alert queue endpoints
///
/// Alerts move open -> acknowledged -> resolved and never reopen.
/// Operator-created alerts always carry the "manual" source; the
/// "threshold" and "enforcement" sources are reserved for the engine.
use crate::{
    alerting::{notifier::AlertDelivery, Alert, AlertPriority, AlertStatus, NewAlert},
    context::AppContext,
    error::{EngineError, EngineResult},
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Query parameters for listing alerts
#[derive(Debug, Deserialize)]
pub struct ListAlertsParams {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub user_id: Option<String>,
    /// Maximum entries (default: 50, max: 500)
    pub limit: Option<i64>,
}

/// Request body for an alert status transition
#[derive(Debug, Deserialize)]
pub struct AlertStatusRequest {
    pub status: AlertStatus,
    pub actor: String,
}

/// Request body for assigning an alert
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assignee: String,
    /// Operator performing the assignment (default: the assignee)
    pub actor: Option<String>,
}

/// List alerts filtered by status, priority, or user
pub async fn list_alerts(
    State(ctx): State<AppContext>,
    Query(params): Query<ListAlertsParams>,
) -> EngineResult<Json<Vec<Alert>>> {
    let status = params
        .status
        .as_deref()
        .map(AlertStatus::from_str)
        .transpose()?;
    let priority = params
        .priority
        .as_deref()
        .map(AlertPriority::from_str)
        .transpose()?;
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let alerts = ctx
        .alerts
        .list(status, priority, params.user_id.as_deref(), limit)
        .await?;

    Ok(Json(alerts))
}

/// Create a manual alert
pub async fn create_alert(
    State(ctx): State<AppContext>,
    Json(mut body): Json<NewAlert>,
) -> EngineResult<Json<Alert>> {
    // Whatever the caller claims, an operator-created alert is manual.
    body.source = "manual".to_string();

    let alert = ctx.alerts.create(body).await?;

    ctx.audit
        .record(
            "operator",
            "alert.create",
            "alert",
            &alert.id,
            serde_json::json!({
                "user_id": alert.user_id,
                "priority": alert.priority.as_str(),
                "category": alert.category,
            }),
        )
        .await?;

    Ok(Json(alert))
}

/// Transition an alert's status
pub async fn update_alert_status(
    State(ctx): State<AppContext>,
    Path(alert_id): Path<String>,
    Json(body): Json<AlertStatusRequest>,
) -> EngineResult<Json<Alert>> {
    if body.actor.trim().is_empty() {
        return Err(EngineError::Validation("actor is required".to_string()));
    }

    let alert = match body.status {
        AlertStatus::Open => {
            return Err(EngineError::Validation(
                "Alerts cannot be reopened".to_string(),
            ));
        }
        AlertStatus::Acknowledged => ctx.alerts.acknowledge(&alert_id, &body.actor).await?,
        AlertStatus::Resolved => ctx.alerts.resolve(&alert_id, &body.actor).await?,
    };

    ctx.audit
        .record(
            &body.actor,
            "alert.status",
            "alert",
            &alert.id,
            serde_json::json!({
                "status": alert.status.as_str(),
            }),
        )
        .await?;

    Ok(Json(alert))
}

/// Assign an alert to an operator
pub async fn assign_alert(
    State(ctx): State<AppContext>,
    Path(alert_id): Path<String>,
    Json(body): Json<AssignRequest>,
) -> EngineResult<Json<Alert>> {
    if body.assignee.trim().is_empty() {
        return Err(EngineError::Validation("assignee is required".to_string()));
    }

    let alert = ctx.alerts.assign(&alert_id, &body.assignee).await?;

    let actor = body.actor.unwrap_or_else(|| body.assignee.clone());
    ctx.audit
        .record(
            &actor,
            "alert.assign",
            "alert",
            &alert.id,
            serde_json::json!({
                "assignee": body.assignee,
            }),
        )
        .await?;

    Ok(Json(alert))
}

/// List delivery attempts for an alert
pub async fn alert_deliveries(
    State(ctx): State<AppContext>,
    Path(alert_id): Path<String>,
) -> EngineResult<Json<Vec<AlertDelivery>>> {
    let deliveries = ctx.alert_router.deliveries(&alert_id).await?;
    Ok(Json(deliveries))
}

/// Build alert routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/alerts", get(list_alerts).post(create_alert))
        .route("/api/alerts/:id/status", post(update_alert_status))
        .route("/api/alerts/:id/assign", post(assign_alert))
        .route("/api/alerts/:id/deliveries", get(alert_deliveries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_parse_filters() {
        let params: ListAlertsParams =
            serde_json::from_str(r#"{"status": "open", "priority": "critical"}"#).unwrap();

        let status = AlertStatus::from_str(params.status.as_deref().unwrap()).unwrap();
        let priority = AlertPriority::from_str(params.priority.as_deref().unwrap()).unwrap();

        assert_eq!(status, AlertStatus::Open);
        assert_eq!(priority, AlertPriority::Critical);
    }

    #[test]
    fn test_list_params_reject_bad_priority() {
        let params: ListAlertsParams =
            serde_json::from_str(r#"{"priority": "urgent"}"#).unwrap();

        let result = params
            .priority
            .as_deref()
            .map(AlertPriority::from_str)
            .transpose();
        assert!(result.is_err());
    }

    #[test]
    fn test_status_request_deserialization() {
        let json = r#"{"status": "acknowledged", "actor": "analyst-3"}"#;
        let body: AlertStatusRequest = serde_json::from_str(json).unwrap();

        assert_eq!(body.status, AlertStatus::Acknowledged);
        assert_eq!(body.actor, "analyst-3");
    }
}
