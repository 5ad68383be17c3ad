use crate::error::{EngineError, EngineResult};
use crate::scoring::tiers::{RiskTier, TrendDirection};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// One persisted score calculation. History is append-only; the current
/// score for a user is the most recent row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub id: String,
    pub user_id: String,
    pub score: f64,
    pub tier: RiskTier,
    pub trend: TrendDirection,
    pub operational: f64,
    pub behavioral: f64,
    pub network: f64,
    pub signal_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ScoreStore {
    db: SqlitePool,
}

impl ScoreStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Append a score row. Existing rows are never touched.
    pub async fn insert(&self, score: &RiskScore) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_scores
            (id, user_id, score, tier, trend, operational, behavioral,
             network, signal_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&score.id)
        .bind(&score.user_id)
        .bind(score.score)
        .bind(score.tier.as_str())
        .bind(score.trend.as_str())
        .bind(score.operational)
        .bind(score.behavioral)
        .bind(score.network)
        .bind(score.signal_count)
        .bind(score.created_at.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn latest(&self, user_id: &str) -> EngineResult<Option<RiskScore>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, score, tier, trend, operational, behavioral,
                   network, signal_count, created_at
            FROM risk_scores
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| parse_score(&r)).transpose()
    }

    pub async fn history(&self, user_id: &str, limit: i64) -> EngineResult<Vec<RiskScore>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, score, tier, trend, operational, behavioral,
                   network, signal_count, created_at
            FROM risk_scores
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut scores = Vec::with_capacity(rows.len());
        for row in rows {
            scores.push(parse_score(&row)?);
        }
        Ok(scores)
    }

    /// User ids whose latest score is at or above the floor. Used to build
    /// recalculation cohorts.
    pub async fn users_with_min_score(&self, min_score: f64) -> EngineResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT rs.user_id
            FROM risk_scores rs
            JOIN (
                SELECT user_id, MAX(created_at) AS max_created
                FROM risk_scores
                GROUP BY user_id
            ) latest ON rs.user_id = latest.user_id
                    AND rs.created_at = latest.max_created
            WHERE rs.score >= ?
            ORDER BY rs.user_id
            "#,
        )
        .bind(min_score)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|r| r.try_get("user_id").map_err(EngineError::from))
            .collect()
    }

    /// User ids whose latest score is older than the cutoff.
    pub async fn users_with_stale_scores(&self, older_than_hours: i64) -> EngineResult<Vec<String>> {
        let cutoff = Utc::now() - Duration::hours(older_than_hours);
        let rows = sqlx::query(
            r#"
            SELECT user_id, MAX(created_at) AS max_created
            FROM risk_scores
            GROUP BY user_id
            HAVING max_created < ?
            ORDER BY user_id
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|r| r.try_get("user_id").map_err(EngineError::from))
            .collect()
    }
}

fn parse_score(row: &sqlx::sqlite::SqliteRow) -> EngineResult<RiskScore> {
    let tier_str: String = row.try_get("tier")?;
    let trend_str: String = row.try_get("trend")?;
    let created_at_str: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(RiskScore {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        score: row.try_get("score")?,
        tier: RiskTier::from_str(&tier_str)?,
        trend: TrendDirection::from_str(&trend_str)?,
        operational: row.try_get("operational")?,
        behavioral: row.try_get("behavioral")?,
        network: row.try_get("network")?,
        signal_count: row.try_get("signal_count")?,
        created_at,
    })
}

#[cfg(test)]
pub(crate) async fn create_score_table(db: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TABLE risk_scores (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            score REAL NOT NULL,
            tier TEXT NOT NULL,
            trend TEXT NOT NULL,
            operational REAL NOT NULL DEFAULT 0,
            behavioral REAL NOT NULL DEFAULT 0,
            network REAL NOT NULL DEFAULT 0,
            signal_count INTEGER NOT NULL DEFAULT 0,
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
    use uuid::Uuid;

    fn score_row(user_id: &str, score: f64, created_at: DateTime<Utc>) -> RiskScore {
        RiskScore {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            score,
            tier: RiskTier::Monitor,
            trend: TrendDirection::Stable,
            operational: 0.0,
            behavioral: score,
            network: 0.0,
            signal_count: 1,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_latest_picks_most_recent() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_score_table(&db).await;
        let store = ScoreStore::new(db);

        let now = Utc::now();
        store
            .insert(&score_row("u1", 10.0, now - Duration::hours(2)))
            .await
            .unwrap();
        store.insert(&score_row("u1", 35.0, now)).await.unwrap();

        let latest = store.latest("u1").await.unwrap().unwrap();
        assert!((latest.score - 35.0).abs() < f64::EPSILON);

        assert!(store.latest("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_ordering_and_limit() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_score_table(&db).await;
        let store = ScoreStore::new(db);

        let now = Utc::now();
        for i in 0..5 {
            store
                .insert(&score_row("u1", i as f64, now - Duration::hours(5 - i)))
                .await
                .unwrap();
        }

        let history = store.history("u1", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!((history[0].score - 4.0).abs() < f64::EPSILON);
        assert!(history[0].created_at > history[1].created_at);
    }

    #[tokio::test]
    async fn test_min_score_cohort_uses_latest_row() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_score_table(&db).await;
        let store = ScoreStore::new(db);

        let now = Utc::now();
        // u1 peaked at 80 but has since dropped to 20.
        store
            .insert(&score_row("u1", 80.0, now - Duration::hours(4)))
            .await
            .unwrap();
        store.insert(&score_row("u1", 20.0, now)).await.unwrap();
        store.insert(&score_row("u2", 55.0, now)).await.unwrap();

        let cohort = store.users_with_min_score(50.0).await.unwrap();
        assert_eq!(cohort, vec!["u2"]);
    }

    #[tokio::test]
    async fn test_stale_cohort() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_score_table(&db).await;
        let store = ScoreStore::new(db);

        let now = Utc::now();
        store
            .insert(&score_row("old", 10.0, now - Duration::hours(50)))
            .await
            .unwrap();
        store.insert(&score_row("fresh", 10.0, now)).await.unwrap();

        let cohort = store.users_with_stale_scores(24).await.unwrap();
        assert_eq!(cohort, vec!["old"]);
    }
}
