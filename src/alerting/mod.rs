/// Alert management
///
/// Alerts are raised by the scorer when a score crosses the notification
/// thresholds, by the enforcement engine when an action fires, and by
/// operators through the API. Each alert carries an SLA deadline derived
/// from its priority. Fan-out to subscriptions lives in
/// [`subscriptions`] and [`notifier`].
pub mod notifier;
pub mod subscriptions;

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Low => "low",
            AlertPriority::Medium => "medium",
            AlertPriority::High => "high",
            AlertPriority::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(AlertPriority::Low),
            "medium" => Ok(AlertPriority::Medium),
            "high" => Ok(AlertPriority::High),
            "critical" => Ok(AlertPriority::Critical),
            _ => Err(EngineError::Validation(format!(
                "Invalid alert priority: {}",
                s
            ))),
        }
    }

    /// Next priority up, or None at critical.
    pub fn next_level(&self) -> Option<AlertPriority> {
        match self {
            AlertPriority::Low => Some(AlertPriority::Medium),
            AlertPriority::Medium => Some(AlertPriority::High),
            AlertPriority::High => Some(AlertPriority::Critical),
            AlertPriority::Critical => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "open" => Ok(AlertStatus::Open),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(EngineError::Validation(format!(
                "Invalid alert status: {}",
                s
            ))),
        }
    }

    /// Resolved alerts are terminal; alerts never reopen.
    pub fn can_transition(&self, to: AlertStatus) -> bool {
        matches!(
            (self, to),
            (AlertStatus::Open, AlertStatus::Acknowledged)
                | (AlertStatus::Open, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
        )
    }
}

/// Notification thresholds and SLA deadlines per priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Score at or above this raises a critical threshold alert.
    pub critical_score_threshold: f64,
    /// Score at or above this raises a high threshold alert.
    pub high_score_threshold: f64,
    /// Suppress a new threshold alert if an open one for the same user is
    /// younger than this.
    pub dedup_window_hours: i64,
    pub critical_sla_hours: i64,
    pub high_sla_hours: i64,
    pub medium_sla_hours: i64,
    pub low_sla_hours: i64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            critical_score_threshold: 85.0,
            high_score_threshold: 70.0,
            dedup_window_hours: 24,
            critical_sla_hours: 1,
            high_sla_hours: 4,
            medium_sla_hours: 24,
            low_sla_hours: 72,
        }
    }
}

impl AlertPolicy {
    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=100.0).contains(&self.critical_score_threshold)
            || !(0.0..=100.0).contains(&self.high_score_threshold)
        {
            return Err(EngineError::Config(
                "alert score thresholds must be within [0,100]".to_string(),
            ));
        }
        if self.critical_score_threshold <= self.high_score_threshold {
            return Err(EngineError::Config(
                "critical_score_threshold must exceed high_score_threshold".to_string(),
            ));
        }
        if self.dedup_window_hours < 0 {
            return Err(EngineError::Config(
                "dedup_window_hours must not be negative".to_string(),
            ));
        }
        let slas = [
            self.critical_sla_hours,
            self.high_sla_hours,
            self.medium_sla_hours,
            self.low_sla_hours,
        ];
        if slas.iter().any(|h| *h < 1) {
            return Err(EngineError::Config(
                "SLA hours must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn due_after(&self, priority: AlertPriority) -> Duration {
        let hours = match priority {
            AlertPriority::Critical => self.critical_sla_hours,
            AlertPriority::High => self.high_sla_hours,
            AlertPriority::Medium => self.medium_sla_hours,
            AlertPriority::Low => self.low_sla_hours,
        };
        Duration::hours(hours)
    }

    /// Priority for a score-driven alert, or None below the high threshold.
    pub fn threshold_priority(&self, score: f64) -> Option<AlertPriority> {
        if score >= self.critical_score_threshold {
            Some(AlertPriority::Critical)
        } else if score >= self.high_score_threshold {
            Some(AlertPriority::High)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub user_id: String,
    pub priority: AlertPriority,
    pub status: AlertStatus,
    pub source: String,
    pub category: String,
    pub title: String,
    pub body: String,
    pub risk_signal_ids: Vec<String>,
    pub assigned_to: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAlert {
    pub user_id: String,
    pub priority: AlertPriority,
    pub source: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub risk_signal_ids: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Clone)]
pub struct AlertStore {
    db: SqlitePool,
    policy: AlertPolicy,
}

impl AlertStore {
    pub fn new(db: SqlitePool, policy: AlertPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Build a fully-populated alert without persisting it. The SLA
    /// deadline comes from the policy.
    pub fn build(&self, new: NewAlert) -> EngineResult<Alert> {
        if new.user_id.is_empty() {
            return Err(EngineError::Validation("user_id is required".to_string()));
        }
        if new.title.is_empty() {
            return Err(EngineError::Validation("title is required".to_string()));
        }
        let now = Utc::now();
        Ok(Alert {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            priority: new.priority,
            status: AlertStatus::Open,
            source: new.source,
            category: new.category,
            title: new.title,
            body: new.body,
            risk_signal_ids: new.risk_signal_ids,
            assigned_to: None,
            due_at: Some(now + self.policy.due_after(new.priority)),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn create(&self, new: NewAlert) -> EngineResult<Alert> {
        let alert = self.build(new)?;
        insert_alert(&self.db, &alert).await?;
        crate::metrics::record_alert_raised(alert.priority.as_str(), &alert.source);
        Ok(alert)
    }

    /// Raise a score-threshold alert, suppressing duplicates while an open
    /// one for the same user is inside the dedup window.
    pub async fn raise_threshold_alert(
        &self,
        user_id: &str,
        score: f64,
        tier_label: &str,
        signal_ids: &[String],
    ) -> EngineResult<Option<Alert>> {
        let priority = match self.policy.threshold_priority(score) {
            Some(p) => p,
            None => return Ok(None),
        };

        let cutoff = Utc::now() - Duration::hours(self.policy.dedup_window_hours);
        let existing = sqlx::query(
            r#"
            SELECT id FROM alerts
            WHERE user_id = ? AND category = 'risk_score' AND status = 'open'
              AND created_at > ?
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(cutoff.to_rfc3339())
        .fetch_optional(&self.db)
        .await?;
        if existing.is_some() {
            return Ok(None);
        }

        let alert = self
            .create(NewAlert {
                user_id: user_id.to_string(),
                priority,
                source: "threshold".to_string(),
                category: "risk_score".to_string(),
                title: format!("Risk score {:.1} ({} tier)", score, tier_label),
                body: format!(
                    "User {} crossed the {} notification threshold with score {:.1}",
                    user_id,
                    priority.as_str(),
                    score
                ),
                risk_signal_ids: signal_ids.to_vec(),
            })
            .await?;
        Ok(Some(alert))
    }

    pub async fn get(&self, id: &str) -> EngineResult<Alert> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, priority, status, source, category, title,
                   body, risk_signal_ids, assigned_to, due_at, created_at,
                   updated_at
            FROM alerts WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Alert not found".to_string()))?;

        parse_alert(&row)
    }

    pub async fn list(
        &self,
        status: Option<AlertStatus>,
        priority: Option<AlertPriority>,
        user_id: Option<&str>,
        limit: i64,
    ) -> EngineResult<Vec<Alert>> {
        let status_str = status.map(|s| s.as_str().to_string());
        let priority_str = priority.map(|p| p.as_str().to_string());

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, priority, status, source, category, title,
                   body, risk_signal_ids, assigned_to, due_at, created_at,
                   updated_at
            FROM alerts
            WHERE (? IS NULL OR status = ?)
              AND (? IS NULL OR priority = ?)
              AND (? IS NULL OR user_id = ?)
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(&status_str)
        .bind(&status_str)
        .bind(&priority_str)
        .bind(&priority_str)
        .bind(user_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in rows {
            alerts.push(parse_alert(&row)?);
        }
        Ok(alerts)
    }

    /// Open or acknowledged alerts whose SLA deadline has passed.
    pub async fn overdue(&self) -> EngineResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, priority, status, source, category, title,
                   body, risk_signal_ids, assigned_to, due_at, created_at,
                   updated_at
            FROM alerts
            WHERE status IN ('open', 'acknowledged')
              AND due_at IS NOT NULL AND due_at < ?
            ORDER BY due_at ASC
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .fetch_all(&self.db)
        .await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in rows {
            alerts.push(parse_alert(&row)?);
        }
        Ok(alerts)
    }

    /// Bump an unresolved alert one priority level and restart its SLA
    /// clock. Critical alerts have nowhere to go and are returned as-is.
    pub async fn escalate(&self, id: &str) -> EngineResult<Alert> {
        let alert = self.get(id).await?;
        if alert.status == AlertStatus::Resolved {
            return Err(EngineError::Conflict(
                "Resolved alerts cannot be escalated".to_string(),
            ));
        }
        let Some(next) = alert.priority.next_level() else {
            return Ok(alert);
        };

        let now = Utc::now();
        let due_at = now + self.policy.due_after(next);
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET priority = ?, due_at = ?, updated_at = ?
            WHERE id = ? AND priority = ? AND status IN ('open', 'acknowledged')
            "#,
        )
        .bind(next.as_str())
        .bind(due_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(alert.priority.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Conflict(
                "Alert was updated concurrently".to_string(),
            ));
        }
        tracing::warn!(
            alert_id = %id,
            from = alert.priority.as_str(),
            to = next.as_str(),
            "Escalated overdue alert"
        );
        self.get(id).await
    }

    pub async fn acknowledge(&self, id: &str, actor: &str) -> EngineResult<Alert> {
        self.transition(id, AlertStatus::Acknowledged, Some(actor))
            .await
    }

    pub async fn resolve(&self, id: &str, actor: &str) -> EngineResult<Alert> {
        self.transition(id, AlertStatus::Resolved, Some(actor)).await
    }

    async fn transition(
        &self,
        id: &str,
        to: AlertStatus,
        actor: Option<&str>,
    ) -> EngineResult<Alert> {
        let alert = self.get(id).await?;
        if !alert.status.can_transition(to) {
            return Err(EngineError::Conflict(format!(
                "Alert is {} and cannot become {}",
                alert.status.as_str(),
                to.as_str()
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET status = ?, assigned_to = COALESCE(assigned_to, ?), updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(actor)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(alert.status.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Conflict(
                "Alert was updated concurrently".to_string(),
            ));
        }
        self.get(id).await
    }

    pub async fn assign(&self, id: &str, assignee: &str) -> EngineResult<Alert> {
        let result = sqlx::query(
            r#"
            UPDATE alerts SET assigned_to = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(assignee)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound("Alert not found".to_string()));
        }
        self.get(id).await
    }
}

/// Insert an alert through any executor so the enforcement engine can
/// write actions and their alerts in one transaction.
pub(crate) async fn insert_alert<'a>(
    executor: impl sqlx::SqliteExecutor<'a>,
    alert: &Alert,
) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO alerts
        (id, user_id, priority, status, source, category, title, body,
         risk_signal_ids, assigned_to, due_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&alert.id)
    .bind(&alert.user_id)
    .bind(alert.priority.as_str())
    .bind(alert.status.as_str())
    .bind(&alert.source)
    .bind(&alert.category)
    .bind(&alert.title)
    .bind(&alert.body)
    .bind(serde_json::to_string(&alert.risk_signal_ids)?)
    .bind(&alert.assigned_to)
    .bind(alert.due_at.map(|t| t.to_rfc3339()))
    .bind(alert.created_at.to_rfc3339())
    .bind(alert.updated_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

fn parse_alert(row: &sqlx::sqlite::SqliteRow) -> EngineResult<Alert> {
    let priority_str: String = row.try_get("priority")?;
    let status_str: String = row.try_get("status")?;

    let signal_ids_str: String = row.try_get("risk_signal_ids")?;
    let risk_signal_ids: Vec<String> =
        serde_json::from_str(&signal_ids_str).unwrap_or_default();

    let due_at_str: Option<String> = row.try_get("due_at")?;
    let due_at = match due_at_str {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);
    let updated_at_str: String = row.try_get("updated_at")?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(Alert {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        priority: AlertPriority::from_str(&priority_str)?,
        status: AlertStatus::from_str(&status_str)?,
        source: row.try_get("source")?,
        category: row.try_get("category")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        risk_signal_ids,
        assigned_to: row.try_get("assigned_to")?,
        due_at,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
pub(crate) async fn create_alert_table(db: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TABLE alerts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            priority TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            source TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'general',
            title TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            risk_signal_ids TEXT NOT NULL DEFAULT '[]',
            assigned_to TEXT,
            due_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
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

    fn store(db: SqlitePool) -> AlertStore {
        AlertStore::new(db, AlertPolicy::default())
    }

    #[test]
    fn test_threshold_priority_bands() {
        let policy = AlertPolicy::default();
        assert_eq!(policy.threshold_priority(90.0), Some(AlertPriority::Critical));
        assert_eq!(policy.threshold_priority(85.0), Some(AlertPriority::Critical));
        assert_eq!(policy.threshold_priority(72.0), Some(AlertPriority::High));
        assert_eq!(policy.threshold_priority(69.9), None);
    }

    #[test]
    fn test_policy_threshold_ordering_enforced() {
        let policy = AlertPolicy {
            critical_score_threshold: 60.0,
            high_score_threshold: 70.0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert!(AlertPolicy::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_create_sets_sla_deadline() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_alert_table(&db).await;
        let store = store(db);

        let alert = store
            .create(NewAlert {
                user_id: "u1".to_string(),
                priority: AlertPriority::Critical,
                source: "manual".to_string(),
                category: "general".to_string(),
                title: "payment redirection ring".to_string(),
                body: String::new(),
                risk_signal_ids: vec![],
            })
            .await
            .unwrap();

        let due = alert.due_at.unwrap();
        let delta = due - alert.created_at;
        assert_eq!(delta.num_hours(), 1);
    }

    #[tokio::test]
    async fn test_threshold_alert_dedup() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_alert_table(&db).await;
        let store = store(db);

        let first = store
            .raise_threshold_alert("u1", 88.0, "critical", &[])
            .await
            .unwrap();
        assert!(first.is_some());

        // Same user inside the window: suppressed.
        let second = store
            .raise_threshold_alert("u1", 92.0, "critical", &[])
            .await
            .unwrap();
        assert!(second.is_none());

        // Different user is unaffected.
        let other = store
            .raise_threshold_alert("u2", 75.0, "high", &[])
            .await
            .unwrap();
        assert_eq!(other.unwrap().priority, AlertPriority::High);

        // Below the high threshold nothing fires.
        let quiet = store
            .raise_threshold_alert("u3", 50.0, "medium", &[])
            .await
            .unwrap();
        assert!(quiet.is_none());
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_alert_table(&db).await;
        let store = store(db);

        let alert = store
            .create(NewAlert {
                user_id: "u1".to_string(),
                priority: AlertPriority::High,
                source: "manual".to_string(),
                category: "general".to_string(),
                title: "t".to_string(),
                body: String::new(),
                risk_signal_ids: vec![],
            })
            .await
            .unwrap();

        let acked = store.acknowledge(&alert.id, "op_1").await.unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(acked.assigned_to.as_deref(), Some("op_1"));

        let resolved = store.resolve(&alert.id, "op_1").await.unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);

        // Resolved is terminal.
        let again = store.acknowledge(&alert.id, "op_2").await;
        assert!(matches!(again, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_escalation_bumps_priority_and_restarts_sla() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_alert_table(&db).await;
        let store = store(db);

        let alert = store
            .create(NewAlert {
                user_id: "u1".to_string(),
                priority: AlertPriority::Low,
                source: "manual".to_string(),
                category: "general".to_string(),
                title: "t".to_string(),
                body: String::new(),
                risk_signal_ids: vec![],
            })
            .await
            .unwrap();

        let escalated = store.escalate(&alert.id).await.unwrap();
        assert_eq!(escalated.priority, AlertPriority::Medium);
        let due = escalated.due_at.unwrap();
        assert_eq!((due - escalated.updated_at).num_hours(), 24);

        // Critical has nowhere to go.
        let critical = store
            .create(NewAlert {
                user_id: "u2".to_string(),
                priority: AlertPriority::Critical,
                source: "manual".to_string(),
                category: "general".to_string(),
                title: "t".to_string(),
                body: String::new(),
                risk_signal_ids: vec![],
            })
            .await
            .unwrap();
        let unchanged = store.escalate(&critical.id).await.unwrap();
        assert_eq!(unchanged.priority, AlertPriority::Critical);

        // Resolved alerts cannot be escalated.
        store.resolve(&alert.id, "op_1").await.unwrap();
        let done = store.escalate(&alert.id).await;
        assert!(matches!(done, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_alert_table(&db).await;
        let store = store(db);

        for (user, priority) in [("u1", AlertPriority::Low), ("u2", AlertPriority::Critical)] {
            store
                .create(NewAlert {
                    user_id: user.to_string(),
                    priority,
                    source: "manual".to_string(),
                    category: "general".to_string(),
                    title: "t".to_string(),
                    body: String::new(),
                    risk_signal_ids: vec![],
                })
                .await
                .unwrap();
        }

        let all = store.list(None, None, None, 50).await.unwrap();
        assert_eq!(all.len(), 2);

        let critical = store
            .list(None, Some(AlertPriority::Critical), None, 50)
            .await
            .unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].user_id, "u2");

        let for_user = store.list(None, None, Some("u1"), 50).await.unwrap();
        assert_eq!(for_user.len(), 1);
    }
}
