/// Audit log
///
/// Append-only record of who did what to which subject. Written for
/// operator-initiated mutations so enforcement history can be
/// reconstructed after the fact.
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor: String,
    pub action: String,
    pub subject_type: String,
    pub subject_id: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuditStore {
    db: SqlitePool,
}

impl AuditStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn record(
        &self,
        actor: &str,
        action: &str,
        subject_type: &str,
        subject_id: &str,
        detail: serde_json::Value,
    ) -> EngineResult<AuditEntry> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO audit_log (id, actor, action, subject_type, subject_id, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(actor)
        .bind(action)
        .bind(subject_type)
        .bind(subject_id)
        .bind(detail.to_string())
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(AuditEntry {
            id,
            actor: actor.to_string(),
            action: action.to_string(),
            subject_type: subject_type.to_string(),
            subject_id: subject_id.to_string(),
            detail,
            created_at: now,
        })
    }

    pub async fn for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor, action, subject_type, subject_id, detail, created_at
            FROM audit_log
            WHERE subject_type = ? AND subject_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(subject_type)
        .bind(subject_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(parse_entry(&row)?);
        }
        Ok(entries)
    }

    pub async fn recent(&self, limit: i64) -> EngineResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor, action, subject_type, subject_id, detail, created_at
            FROM audit_log
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(parse_entry(&row)?);
        }
        Ok(entries)
    }
}

fn parse_entry(row: &sqlx::sqlite::SqliteRow) -> EngineResult<AuditEntry> {
    let detail_str: String = row.try_get("detail")?;
    let detail = serde_json::from_str(&detail_str)
        .unwrap_or(serde_json::Value::Object(Default::default()));

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(AuditEntry {
        id: row.try_get("id")?,
        actor: row.try_get("actor")?,
        action: row.try_get("action")?,
        subject_type: row.try_get("subject_type")?,
        subject_id: row.try_get("subject_id")?,
        detail,
        created_at,
    })
}

#[cfg(test)]
pub(crate) async fn create_audit_table(db: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TABLE audit_log (
            id TEXT PRIMARY KEY,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            subject_type TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(db)
    .await
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_query() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_audit_table(&db).await;
        let store = AuditStore::new(db);

        store
            .record(
                "op_lena",
                "action.reverse",
                "enforcement_action",
                "a1",
                serde_json::json!({"reason": "appeal approved"}),
            )
            .await
            .unwrap();
        store
            .record(
                "op_kim",
                "alert.resolve",
                "alert",
                "al1",
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let for_action = store
            .for_subject("enforcement_action", "a1", 10)
            .await
            .unwrap();
        assert_eq!(for_action.len(), 1);
        assert_eq!(for_action[0].actor, "op_lena");
        assert_eq!(for_action[0].detail["reason"], "appeal approved");

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
    }
}
