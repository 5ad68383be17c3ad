/// Audit log endpoints
use crate::{
    audit::AuditEntry,
    context::AppContext,
    error::{EngineError, EngineResult},
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

/// Query parameters for audit lookups
#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    /// Maximum entries (default: 50, max: 500)
    pub limit: Option<i64>,
}

/// List audit entries, either for one subject or the recent tail
pub async fn list_audit(
    State(ctx): State<AppContext>,
    Query(params): Query<AuditParams>,
) -> EngineResult<Json<Vec<AuditEntry>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let entries = match (&params.subject_type, &params.subject_id) {
        (Some(subject_type), Some(subject_id)) => {
            ctx.audit.for_subject(subject_type, subject_id, limit).await?
        }
        (None, None) => ctx.audit.recent(limit).await?,
        _ => {
            return Err(EngineError::Validation(
                "subject_type and subject_id must be provided together".to_string(),
            ));
        }
    };

    Ok(Json(entries))
}

/// Build audit routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/api/audit", get(list_audit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_params_deserialization() {
        let params: AuditParams = serde_json::from_str(
            r#"{"subject_type": "alert", "subject_id": "al-1", "limit": 20}"#,
        )
        .unwrap();

        assert_eq!(params.subject_type.as_deref(), Some("alert"));
        assert_eq!(params.subject_id.as_deref(), Some("al-1"));
        assert_eq!(params.limit, Some(20));
    }

    #[test]
    fn test_audit_params_empty_means_recent() {
        let params: AuditParams = serde_json::from_str("{}").unwrap();

        assert!(params.subject_type.is_none());
        assert!(params.subject_id.is_none());
    }
}
