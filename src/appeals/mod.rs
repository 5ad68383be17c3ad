/// Appeals
///
/// Users can appeal an enforcement action. Appeals move submitted ->
/// under_review -> approved or denied; approval reverses the action in
/// the same transaction that resolves the appeal, so the two can never
/// disagree.
use crate::enforcement::actions::{reverse_action, ActionStore};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealStatus {
    Submitted,
    UnderReview,
    Approved,
    Denied,
}

impl AppealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppealStatus::Submitted => "submitted",
            AppealStatus::UnderReview => "under_review",
            AppealStatus::Approved => "approved",
            AppealStatus::Denied => "denied",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "submitted" => Ok(AppealStatus::Submitted),
            "under_review" => Ok(AppealStatus::UnderReview),
            "approved" => Ok(AppealStatus::Approved),
            "denied" => Ok(AppealStatus::Denied),
            _ => Err(EngineError::Validation(format!(
                "Invalid appeal status: {}",
                s
            ))),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, AppealStatus::Submitted | AppealStatus::UnderReview)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Appeal {
    pub id: String,
    pub enforcement_action_id: String,
    pub user_id: String,
    pub status: AppealStatus,
    pub reason: String,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub review_started_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct AppealManager {
    db: SqlitePool,
    actions: ActionStore,
}

impl AppealManager {
    pub fn new(db: SqlitePool, actions: ActionStore) -> Self {
        Self { db, actions }
    }

    /// Submit an appeal against an action. The action must exist, belong
    /// to the appellant, not be reversed already, and not have another
    /// open appeal.
    pub async fn submit(
        &self,
        action_id: &str,
        user_id: &str,
        reason: &str,
    ) -> EngineResult<Appeal> {
        if reason.trim().is_empty() {
            return Err(EngineError::Validation("reason is required".to_string()));
        }

        let action = self.actions.get(action_id).await?;
        if action.user_id != user_id {
            return Err(EngineError::Validation(
                "Appeals can only be submitted by the sanctioned user".to_string(),
            ));
        }
        if action.reversed_at.is_some() {
            return Err(EngineError::Conflict(
                "Action is already reversed".to_string(),
            ));
        }
        if let Some(existing) = self.open_appeal_for_action(action_id).await? {
            return Err(EngineError::Conflict(format!(
                "Action already has an open appeal ({})",
                existing.id
            )));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO appeals (id, enforcement_action_id, user_id, status, reason, submitted_at)
            VALUES (?, ?, ?, 'submitted', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(action_id)
        .bind(user_id)
        .bind(reason)
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        tracing::info!(appeal_id = %id, action_id = %action_id, user_id = %user_id, "Appeal submitted");
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> EngineResult<Appeal> {
        let row = sqlx::query(
            r#"
            SELECT id, enforcement_action_id, user_id, status, reason,
                   resolution_notes, resolved_by, submitted_at,
                   review_started_at, reviewed_by, resolved_at
            FROM appeals WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Appeal not found".to_string()))?;

        parse_appeal(&row)
    }

    pub async fn open_appeal_for_action(&self, action_id: &str) -> EngineResult<Option<Appeal>> {
        let row = sqlx::query(
            r#"
            SELECT id, enforcement_action_id, user_id, status, reason,
                   resolution_notes, resolved_by, submitted_at,
                   review_started_at, reviewed_by, resolved_at
            FROM appeals
            WHERE enforcement_action_id = ? AND status IN ('submitted', 'under_review')
            LIMIT 1
            "#,
        )
        .bind(action_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| parse_appeal(&r)).transpose()
    }

    pub async fn list_for_user(&self, user_id: &str, limit: i64) -> EngineResult<Vec<Appeal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, enforcement_action_id, user_id, status, reason,
                   resolution_notes, resolved_by, submitted_at,
                   review_started_at, reviewed_by, resolved_at
            FROM appeals
            WHERE user_id = ?
            ORDER BY submitted_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut appeals = Vec::with_capacity(rows.len());
        for row in rows {
            appeals.push(parse_appeal(&row)?);
        }
        Ok(appeals)
    }

    /// The review queue: open appeals, oldest first.
    pub async fn list_by_status(
        &self,
        status: AppealStatus,
        limit: i64,
    ) -> EngineResult<Vec<Appeal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, enforcement_action_id, user_id, status, reason,
                   resolution_notes, resolved_by, submitted_at,
                   review_started_at, reviewed_by, resolved_at
            FROM appeals
            WHERE status = ?
            ORDER BY submitted_at ASC
            LIMIT ?
            "#,
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut appeals = Vec::with_capacity(rows.len());
        for row in rows {
            appeals.push(parse_appeal(&row)?);
        }
        Ok(appeals)
    }

    /// Take a submitted appeal into review.
    pub async fn begin_review(&self, appeal_id: &str, reviewer: &str) -> EngineResult<Appeal> {
        let appeal = self.get(appeal_id).await?;
        if appeal.status != AppealStatus::Submitted {
            return Err(EngineError::Conflict(format!(
                "Appeal is {} and cannot enter review",
                appeal.status.as_str()
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE appeals
            SET status = 'under_review', review_started_at = ?, reviewed_by = ?
            WHERE id = ? AND status = 'submitted'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(reviewer)
        .bind(appeal_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Conflict(
                "Appeal was updated concurrently".to_string(),
            ));
        }
        self.get(appeal_id).await
    }

    /// Resolve an appeal under review. Approval reverses the action in the
    /// same transaction; denial leaves it standing.
    pub async fn resolve(
        &self,
        appeal_id: &str,
        approve: bool,
        reviewer: &str,
        notes: &str,
    ) -> EngineResult<Appeal> {
        let appeal = self.get(appeal_id).await?;
        if appeal.status != AppealStatus::UnderReview {
            return Err(EngineError::Conflict(format!(
                "Appeal is {} and cannot be resolved",
                appeal.status.as_str()
            )));
        }

        let status = if approve {
            AppealStatus::Approved
        } else {
            AppealStatus::Denied
        };
        let now = Utc::now();

        let mut tx = self.db.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE appeals
            SET status = ?, resolved_by = ?, resolved_at = ?, resolution_notes = ?
            WHERE id = ? AND status = 'under_review'
            "#,
        )
        .bind(status.as_str())
        .bind(reviewer)
        .bind(now.to_rfc3339())
        .bind(notes)
        .bind(appeal_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(EngineError::Conflict(
                "Appeal was resolved concurrently".to_string(),
            ));
        }

        if approve {
            let reversed = reverse_action(
                &mut *tx,
                &appeal.enforcement_action_id,
                reviewer,
                &format!("Appeal {} approved", appeal_id),
                now,
            )
            .await?;
            if reversed == 0 {
                tx.rollback().await?;
                return Err(EngineError::Conflict(
                    "Action is already reversed".to_string(),
                ));
            }
        }

        tx.commit().await?;

        crate::metrics::record_appeal_resolution(status.as_str());
        tracing::info!(
            appeal_id = %appeal_id,
            status = status.as_str(),
            reviewer = %reviewer,
            "Appeal resolved"
        );
        self.get(appeal_id).await
    }
}

fn parse_appeal(row: &sqlx::sqlite::SqliteRow) -> EngineResult<Appeal> {
    let status_str: String = row.try_get("status")?;

    let parse_opt_ts = |value: Option<String>| -> EngineResult<Option<DateTime<Utc>>> {
        match value {
            Some(s) => Ok(Some(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
                    .with_timezone(&Utc),
            )),
            None => Ok(None),
        }
    };

    let submitted_at_str: String = row.try_get("submitted_at")?;
    let submitted_at = DateTime::parse_from_rfc3339(&submitted_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(Appeal {
        id: row.try_get("id")?,
        enforcement_action_id: row.try_get("enforcement_action_id")?,
        user_id: row.try_get("user_id")?,
        status: AppealStatus::from_str(&status_str)?,
        reason: row.try_get("reason")?,
        resolution_notes: row.try_get("resolution_notes")?,
        resolved_by: row.try_get("resolved_by")?,
        submitted_at,
        review_started_at: parse_opt_ts(row.try_get("review_started_at")?)?,
        reviewed_by: row.try_get("reviewed_by")?,
        resolved_at: parse_opt_ts(row.try_get("resolved_at")?)?,
    })
}

#[cfg(test)]
pub(crate) async fn create_appeal_table(db: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TABLE appeals (
            id TEXT PRIMARY KEY,
            enforcement_action_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'submitted',
            reason TEXT NOT NULL,
            resolution_notes TEXT,
            resolved_by TEXT,
            submitted_at TEXT NOT NULL,
            review_started_at TEXT,
            reviewed_by TEXT,
            resolved_at TEXT
        )
        "#,
    )
    .execute(db)
    .await
    .unwrap();
}
