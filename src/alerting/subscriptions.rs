/// Alert subscriptions
///
/// A subscription filters alerts by priority, source, and category. A
/// null filter set means "match everything" for that field; a disabled
/// subscription matches nothing. Matching is a pure predicate so the
/// routing behavior can be tested without a database.
use crate::alerting::notifier::ChannelKind;
use crate::alerting::{Alert, AlertPriority};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AlertSubscription {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub enabled: bool,
    pub priorities: Option<Vec<AlertPriority>>,
    pub sources: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
    pub channels: Vec<ChannelKind>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscription {
    pub owner: String,
    pub name: String,
    pub priorities: Option<Vec<AlertPriority>>,
    pub sources: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelKind>,
    pub email: Option<String>,
}

fn default_channels() -> Vec<ChannelKind> {
    vec![ChannelKind::Dashboard]
}

/// Whether a subscription wants this alert. Every specified filter must
/// match; unspecified filters are wildcards.
pub fn subscription_matches(subscription: &AlertSubscription, alert: &Alert) -> bool {
    if !subscription.enabled {
        return false;
    }
    if let Some(priorities) = &subscription.priorities {
        if !priorities.contains(&alert.priority) {
            return false;
        }
    }
    if let Some(sources) = &subscription.sources {
        if !sources.contains(&alert.source) {
            return false;
        }
    }
    if let Some(categories) = &subscription.categories {
        if !categories.contains(&alert.category) {
            return false;
        }
    }
    true
}

#[derive(Clone)]
pub struct SubscriptionStore {
    db: SqlitePool,
}

impl SubscriptionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewSubscription) -> EngineResult<AlertSubscription> {
        if new.owner.is_empty() {
            return Err(EngineError::Validation("owner is required".to_string()));
        }
        if new.name.is_empty() {
            return Err(EngineError::Validation("name is required".to_string()));
        }
        if new.channels.is_empty() {
            return Err(EngineError::Validation(
                "at least one channel is required".to_string(),
            ));
        }
        if new.channels.contains(&ChannelKind::Email) && new.email.is_none() {
            return Err(EngineError::Validation(
                "email channel requires an email address".to_string(),
            ));
        }
        if let Some(priorities) = &new.priorities {
            if priorities.is_empty() {
                return Err(EngineError::Validation(
                    "priorities filter cannot be an empty list".to_string(),
                ));
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO alert_subscriptions
            (id, owner, name, enabled, priorities, sources, categories,
             channels, email, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.owner)
        .bind(&new.name)
        .bind(encode_opt_list(&new.priorities.as_ref().map(|ps| {
            ps.iter().map(|p| p.as_str().to_string()).collect::<Vec<_>>()
        }))?)
        .bind(encode_opt_list(&new.sources)?)
        .bind(encode_opt_list(&new.categories)?)
        .bind(serde_json::to_string(
            &new.channels
                .iter()
                .map(|c| c.as_str().to_string())
                .collect::<Vec<_>>(),
        )?)
        .bind(&new.email)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> EngineResult<AlertSubscription> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, name, enabled, priorities, sources, categories,
                   channels, email, created_at, updated_at
            FROM alert_subscriptions WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Subscription not found".to_string()))?;

        parse_subscription(&row)
    }

    pub async fn list(&self, owner: Option<&str>) -> EngineResult<Vec<AlertSubscription>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, name, enabled, priorities, sources, categories,
                   channels, email, created_at, updated_at
            FROM alert_subscriptions
            WHERE (? IS NULL OR owner = ?)
            ORDER BY created_at ASC
            "#,
        )
        .bind(owner)
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        let mut subs = Vec::with_capacity(rows.len());
        for row in rows {
            subs.push(parse_subscription(&row)?);
        }
        Ok(subs)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> EngineResult<AlertSubscription> {
        let result = sqlx::query(
            "UPDATE alert_subscriptions SET enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(enabled as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound("Subscription not found".to_string()));
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        let result = sqlx::query("DELETE FROM alert_subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound("Subscription not found".to_string()));
        }
        Ok(())
    }

    /// All enabled subscriptions that want the given alert.
    pub async fn matching(&self, alert: &Alert) -> EngineResult<Vec<AlertSubscription>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, name, enabled, priorities, sources, categories,
                   channels, email, created_at, updated_at
            FROM alert_subscriptions
            WHERE enabled = 1
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut matched = Vec::new();
        for row in rows {
            let sub = parse_subscription(&row)?;
            if subscription_matches(&sub, alert) {
                matched.push(sub);
            }
        }
        Ok(matched)
    }
}

fn encode_opt_list(list: &Option<Vec<String>>) -> EngineResult<Option<String>> {
    match list {
        Some(values) => Ok(Some(serde_json::to_string(values)?)),
        None => Ok(None),
    }
}

fn parse_subscription(row: &sqlx::sqlite::SqliteRow) -> EngineResult<AlertSubscription> {
    let priorities_str: Option<String> = row.try_get("priorities")?;
    let priorities = match priorities_str {
        Some(s) => {
            let raw: Vec<String> = serde_json::from_str(&s)?;
            let mut parsed = Vec::with_capacity(raw.len());
            for value in raw {
                parsed.push(AlertPriority::from_str(&value)?);
            }
            Some(parsed)
        }
        None => None,
    };

    let decode_opt_list = |value: Option<String>| -> EngineResult<Option<Vec<String>>> {
        match value {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    };

    let channels_str: String = row.try_get("channels")?;
    let raw_channels: Vec<String> = serde_json::from_str(&channels_str)?;
    let mut channels = Vec::with_capacity(raw_channels.len());
    for value in raw_channels {
        channels.push(ChannelKind::from_str(&value)?);
    }

    let enabled: i64 = row.try_get("enabled")?;

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);
    let updated_at_str: String = row.try_get("updated_at")?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(AlertSubscription {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        name: row.try_get("name")?,
        enabled: enabled != 0,
        priorities,
        sources: decode_opt_list(row.try_get("sources")?)?,
        categories: decode_opt_list(row.try_get("categories")?)?,
        channels,
        email: row.try_get("email")?,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
pub(crate) async fn create_subscription_table(db: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TABLE alert_subscriptions (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            priorities TEXT,
            sources TEXT,
            categories TEXT,
            channels TEXT NOT NULL DEFAULT '["dashboard"]',
            email TEXT,
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
    use crate::alerting::AlertStatus;

    fn test_alert(priority: AlertPriority, source: &str, category: &str) -> Alert {
        let now = Utc::now();
        Alert {
            id: Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            priority,
            status: AlertStatus::Open,
            source: source.to_string(),
            category: category.to_string(),
            title: "t".to_string(),
            body: String::new(),
            risk_signal_ids: vec![],
            assigned_to: None,
            due_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_subscription() -> AlertSubscription {
        let now = Utc::now();
        AlertSubscription {
            id: "sub1".to_string(),
            owner: "ops".to_string(),
            name: "critical only".to_string(),
            enabled: true,
            priorities: None,
            sources: None,
            categories: None,
            channels: vec![ChannelKind::Dashboard],
            email: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_wildcards_match_everything() {
        let sub = test_subscription();
        assert!(subscription_matches(
            &sub,
            &test_alert(AlertPriority::Low, "threshold", "risk_score")
        ));
        assert!(subscription_matches(
            &sub,
            &test_alert(AlertPriority::Critical, "enforcement", "enforcement")
        ));
    }

    #[test]
    fn test_disabled_matches_nothing() {
        let mut sub = test_subscription();
        sub.enabled = false;
        assert!(!subscription_matches(
            &sub,
            &test_alert(AlertPriority::Critical, "enforcement", "enforcement")
        ));
    }

    #[test]
    fn test_every_specified_filter_must_match() {
        let mut sub = test_subscription();
        sub.priorities = Some(vec![AlertPriority::High, AlertPriority::Critical]);
        sub.sources = Some(vec!["enforcement".to_string()]);

        assert!(subscription_matches(
            &sub,
            &test_alert(AlertPriority::Critical, "enforcement", "general")
        ));
        // Priority matches, source does not.
        assert!(!subscription_matches(
            &sub,
            &test_alert(AlertPriority::Critical, "threshold", "general")
        ));
        // Source matches, priority does not.
        assert!(!subscription_matches(
            &sub,
            &test_alert(AlertPriority::Low, "enforcement", "general")
        ));

        sub.categories = Some(vec!["ban_recommendation".to_string()]);
        assert!(!subscription_matches(
            &sub,
            &test_alert(AlertPriority::Critical, "enforcement", "general")
        ));
    }

    #[tokio::test]
    async fn test_create_validates_email_channel() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_subscription_table(&db).await;
        let store = SubscriptionStore::new(db);

        let result = store
            .create(NewSubscription {
                owner: "ops".to_string(),
                name: "mail me".to_string(),
                priorities: None,
                sources: None,
                categories: None,
                channels: vec![ChannelKind::Email],
                email: None,
            })
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_store_round_trip_and_matching() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_subscription_table(&db).await;
        let store = SubscriptionStore::new(db);

        let sub = store
            .create(NewSubscription {
                owner: "ops".to_string(),
                name: "critical enforcement".to_string(),
                priorities: Some(vec![AlertPriority::Critical]),
                sources: Some(vec!["enforcement".to_string()]),
                categories: None,
                channels: vec![ChannelKind::Dashboard, ChannelKind::Email],
                email: Some("ops@example.com".to_string()),
            })
            .await
            .unwrap();
        assert!(sub.enabled);
        assert_eq!(sub.channels.len(), 2);

        let hit = store
            .matching(&test_alert(
                AlertPriority::Critical,
                "enforcement",
                "ban_recommendation",
            ))
            .await
            .unwrap();
        assert_eq!(hit.len(), 1);

        let miss = store
            .matching(&test_alert(AlertPriority::Low, "threshold", "risk_score"))
            .await
            .unwrap();
        assert!(miss.is_empty());

        // Disabling removes it from matching without deleting it.
        store.set_enabled(&sub.id, false).await.unwrap();
        let gone = store
            .matching(&test_alert(
                AlertPriority::Critical,
                "enforcement",
                "ban_recommendation",
            ))
            .await
            .unwrap();
        assert!(gone.is_empty());

        store.delete(&sub.id).await.unwrap();
        assert!(matches!(
            store.get(&sub.id).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
