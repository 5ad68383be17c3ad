/// Alert subscription endpoints
use crate::{
    alerting::subscriptions::{AlertSubscription, NewSubscription},
    context::AppContext,
    error::EngineResult,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;

/// Query parameters for listing subscriptions
#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsParams {
    /// Filter to one owner's subscriptions
    pub owner: Option<String>,
}

/// Request body for toggling a subscription
#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub enabled: bool,
    /// Operator making the change (default: "operator")
    pub actor: Option<String>,
}

/// List subscriptions, optionally by owner
pub async fn list_subscriptions(
    State(ctx): State<AppContext>,
    Query(params): Query<ListSubscriptionsParams>,
) -> EngineResult<Json<Vec<AlertSubscription>>> {
    let subscriptions = ctx.subscriptions.list(params.owner.as_deref()).await?;
    Ok(Json(subscriptions))
}

/// Create a subscription
pub async fn create_subscription(
    State(ctx): State<AppContext>,
    Json(body): Json<NewSubscription>,
) -> EngineResult<Json<AlertSubscription>> {
    let subscription = ctx.subscriptions.create(body).await?;

    ctx.audit
        .record(
            &subscription.owner,
            "subscription.create",
            "subscription",
            &subscription.id,
            serde_json::json!({
                "name": subscription.name,
                "channels": subscription.channels,
            }),
        )
        .await?;

    Ok(Json(subscription))
}

/// Enable or disable a subscription
pub async fn update_subscription(
    State(ctx): State<AppContext>,
    Path(subscription_id): Path<String>,
    Json(body): Json<UpdateSubscriptionRequest>,
) -> EngineResult<Json<AlertSubscription>> {
    let subscription = ctx
        .subscriptions
        .set_enabled(&subscription_id, body.enabled)
        .await?;

    let actor = body.actor.unwrap_or_else(|| "operator".to_string());
    ctx.audit
        .record(
            &actor,
            "subscription.update",
            "subscription",
            &subscription.id,
            serde_json::json!({
                "enabled": subscription.enabled,
            }),
        )
        .await?;

    Ok(Json(subscription))
}

/// Delete a subscription
pub async fn delete_subscription(
    State(ctx): State<AppContext>,
    Path(subscription_id): Path<String>,
) -> EngineResult<Json<serde_json::Value>> {
    ctx.subscriptions.delete(&subscription_id).await?;

    ctx.audit
        .record(
            "operator",
            "subscription.delete",
            "subscription",
            &subscription_id,
            serde_json::json!({}),
        )
        .await?;

    Ok(Json(serde_json::json!({ "deleted": subscription_id })))
}

/// Build subscription routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/api/subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route(
            "/api/subscriptions/:id",
            patch(update_subscription).delete(delete_subscription),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::notifier::ChannelKind;

    #[test]
    fn test_new_subscription_defaults_to_dashboard() {
        let json = r#"{"owner": "fraud-team", "name": "All critical"}"#;
        let body: NewSubscription = serde_json::from_str(json).unwrap();

        assert_eq!(body.channels, vec![ChannelKind::Dashboard]);
        assert!(body.priorities.is_none());
        assert!(body.email.is_none());
    }

    #[test]
    fn test_new_subscription_with_email_channel() {
        let json = r#"{
            "owner": "fraud-team",
            "name": "Critical mail",
            "priorities": ["critical"],
            "channels": ["dashboard", "email"],
            "email": "fraud@example.com"
        }"#;
        let body: NewSubscription = serde_json::from_str(json).unwrap();

        assert_eq!(body.channels.len(), 2);
        assert_eq!(body.email.as_deref(), Some("fraud@example.com"));
    }

    #[test]
    fn test_update_request_deserialization() {
        let json = r#"{"enabled": false}"#;
        let body: UpdateSubscriptionRequest = serde_json::from_str(json).unwrap();

        assert!(!body.enabled);
        assert!(body.actor.is_none());
    }
}
