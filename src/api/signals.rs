/// Signal ingestion and query endpoints
use crate::{
    context::AppContext,
    error::{EngineError, EngineResult},
    signals::{NewSignal, RiskSignal},
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Query parameters for listing a user's signals
#[derive(Debug, Deserialize)]
pub struct ListSignalsParams {
    /// Lookback window in days. Defaults to the scoring window.
    pub days: Option<i64>,
}

/// Ingest one risk signal from an upstream classifier
///
/// Signals are append-only; scoring picks this one up on the user's
/// next recompute.
pub async fn ingest_signal(
    State(ctx): State<AppContext>,
    Json(body): Json<NewSignal>,
) -> EngineResult<Json<RiskSignal>> {
    let signal = ctx.signals.record(body).await?;

    tracing::debug!(
        signal_id = %signal.id,
        user_id = %signal.user_id,
        signal_type = signal.signal_type.as_str(),
        "signal_ingested"
    );

    Ok(Json(signal))
}

/// List a user's signals within a trailing window
pub async fn list_signals(
    State(ctx): State<AppContext>,
    Path(user_id): Path<String>,
    Query(params): Query<ListSignalsParams>,
) -> EngineResult<Json<Vec<RiskSignal>>> {
    let days = params
        .days
        .unwrap_or(ctx.config.scoring.signal_window_days);
    if days < 1 {
        return Err(EngineError::Validation(
            "days must be at least 1".to_string(),
        ));
    }

    let signals = ctx.signals.for_user_within(&user_id, days).await?;
    Ok(Json(signals))
}

/// Build signal routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/signals", post(ingest_signal))
        .route("/api/users/:id/signals", get(list_signals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalType;

    #[test]
    fn test_new_signal_deserialization() {
        let json = r#"{
            "user_id": "u-1",
            "signal_type": "contact_phone",
            "confidence": 0.9,
            "evidence": {"message_id": "m-42"},
            "source_event_id": "evt-7",
            "detected_at": null
        }"#;
        let body: NewSignal = serde_json::from_str(json).unwrap();

        assert_eq!(body.user_id, "u-1");
        assert_eq!(body.signal_type, SignalType::ContactPhone);
        assert!(body.obfuscation_flags.is_empty());
        assert_eq!(body.source_event_id.as_deref(), Some("evt-7"));
    }

    #[test]
    fn test_list_params_default_days() {
        let params: ListSignalsParams = serde_json::from_str("{}").unwrap();
        assert!(params.days.is_none());

        let params: ListSignalsParams = serde_json::from_str(r#"{"days": 30}"#).unwrap();
        assert_eq!(params.days, Some(30));
    }
}
