/// User relationship graph
///
/// Edges between marketplace users derived from transactions, messaging,
/// shared devices/addresses, and referrals. The network scoring factor
/// reads depth-1 neighbors; the contagion/graph view walks up to depth 3.
/// Edges are undirected and stored once in canonical order (user_a <
/// user_b). Shared-device edges never store the raw device identifier,
/// only its SHA-256 hash.
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

/// Relationship edge types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Transaction,
    Messaging,
    SharedDevice,
    SharedAddress,
    Referral,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Transaction => "transaction",
            RelationshipType::Messaging => "messaging",
            RelationshipType::SharedDevice => "shared_device",
            RelationshipType::SharedAddress => "shared_address",
            RelationshipType::Referral => "referral",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "transaction" => Ok(RelationshipType::Transaction),
            "messaging" => Ok(RelationshipType::Messaging),
            "shared_device" => Ok(RelationshipType::SharedDevice),
            "shared_address" => Ok(RelationshipType::SharedAddress),
            "referral" => Ok(RelationshipType::Referral),
            _ => Err(EngineError::Validation(format!(
                "Invalid relationship type: {}",
                s
            ))),
        }
    }
}

/// An undirected graph edge between two users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRelationship {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub relationship_type: RelationshipType,
    pub strength_score: f64,
    pub interaction_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl UserRelationship {
    /// The endpoint that is not `user_id`.
    pub fn other(&self, user_id: &str) -> &str {
        if self.user_a == user_id {
            &self.user_b
        } else {
            &self.user_a
        }
    }
}

/// A neighborhood walk result: reachable user ids plus the edges touched.
#[derive(Debug, Clone, Serialize)]
pub struct Neighborhood {
    pub user_ids: Vec<String>,
    pub edges: Vec<UserRelationship>,
}

/// Graph store
#[derive(Clone)]
pub struct GraphStore {
    db: SqlitePool,
}

impl GraphStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Upsert an edge. Repeated observations of the same pair and type
    /// bump interaction_count and refresh strength and last_seen.
    pub async fn record_edge(
        &self,
        user_x: &str,
        user_y: &str,
        relationship_type: RelationshipType,
        strength_score: f64,
        metadata: serde_json::Value,
    ) -> EngineResult<UserRelationship> {
        if user_x == user_y {
            return Err(EngineError::Validation(
                "relationship endpoints must differ".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&strength_score) {
            return Err(EngineError::Validation(format!(
                "strength_score must be within [0,1], got {}",
                strength_score
            )));
        }

        let (user_a, user_b) = canonical_pair(user_x, user_y);
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO user_relationships
            (id, user_a, user_b, relationship_type, strength_score,
             interaction_count, first_seen, last_seen, metadata)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(user_a, user_b, relationship_type) DO UPDATE SET
                strength_score = excluded.strength_score,
                interaction_count = interaction_count + 1,
                last_seen = excluded.last_seen,
                metadata = excluded.metadata
            "#,
        )
        .bind(&id)
        .bind(user_a)
        .bind(user_b)
        .bind(relationship_type.as_str())
        .bind(strength_score)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(metadata.to_string())
        .execute(&self.db)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT id, user_a, user_b, relationship_type, strength_score,
                   interaction_count, first_seen, last_seen, metadata
            FROM user_relationships
            WHERE user_a = ? AND user_b = ? AND relationship_type = ?
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(relationship_type.as_str())
        .fetch_one(&self.db)
        .await?;

        parse_relationship(&row)
    }

    /// Record a shared-device edge from a raw device identifier. Only the
    /// SHA-256 hash of the identifier is stored.
    pub async fn record_shared_device(
        &self,
        user_x: &str,
        user_y: &str,
        raw_device_id: &str,
        strength_score: f64,
    ) -> EngineResult<UserRelationship> {
        let device_hash = hex::encode(Sha256::digest(raw_device_id.as_bytes()));
        self.record_edge(
            user_x,
            user_y,
            RelationshipType::SharedDevice,
            strength_score,
            serde_json::json!({ "device_hash": device_hash }),
        )
        .await
    }

    /// Depth-1 neighbors with strength at or above the floor.
    pub async fn neighbors(
        &self,
        user_id: &str,
        min_strength: f64,
    ) -> EngineResult<Vec<UserRelationship>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_a, user_b, relationship_type, strength_score,
                   interaction_count, first_seen, last_seen, metadata
            FROM user_relationships
            WHERE (user_a = ? OR user_b = ?) AND strength_score >= ?
            ORDER BY strength_score DESC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(min_strength)
        .fetch_all(&self.db)
        .await?;

        let mut edges = Vec::with_capacity(rows.len());
        for row in rows {
            edges.push(parse_relationship(&row)?);
        }
        Ok(edges)
    }

    /// Breadth-first walk from a user. Depth is clamped to 1..=3; the
    /// returned user_ids include the origin and are sorted for stable
    /// output.
    pub async fn neighborhood(
        &self,
        user_id: &str,
        depth: u32,
        min_strength: f64,
    ) -> EngineResult<Neighborhood> {
        let depth = depth.clamp(1, 3);

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(user_id.to_string());
        let mut edge_ids: HashSet<String> = HashSet::new();
        let mut edges: Vec<UserRelationship> = Vec::new();
        let mut frontier = vec![user_id.to_string()];

        for _ in 0..depth {
            let mut next = Vec::new();
            for uid in frontier.drain(..) {
                for edge in self.neighbors(&uid, min_strength).await? {
                    if edge_ids.insert(edge.id.clone()) {
                        let other = edge.other(&uid).to_string();
                        if seen.insert(other.clone()) {
                            next.push(other);
                        }
                        edges.push(edge);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let mut user_ids: Vec<String> = seen.into_iter().collect();
        user_ids.sort();

        Ok(Neighborhood { user_ids, edges })
    }
}

/// Canonical undirected pair ordering.
fn canonical_pair<'a>(x: &'a str, y: &'a str) -> (&'a str, &'a str) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}

/// Parse a database row into a UserRelationship.
fn parse_relationship(row: &sqlx::sqlite::SqliteRow) -> EngineResult<UserRelationship> {
    let type_str: String = row.try_get("relationship_type")?;
    let relationship_type = RelationshipType::from_str(&type_str)?;

    let first_seen_str: String = row.try_get("first_seen")?;
    let first_seen = DateTime::parse_from_rfc3339(&first_seen_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    let last_seen_str: String = row.try_get("last_seen")?;
    let last_seen = DateTime::parse_from_rfc3339(&last_seen_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    let metadata_str: String = row.try_get("metadata")?;
    let metadata =
        serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Object(Default::default()));

    Ok(UserRelationship {
        id: row.try_get("id")?,
        user_a: row.try_get("user_a")?,
        user_b: row.try_get("user_b")?,
        relationship_type,
        strength_score: row.try_get("strength_score")?,
        interaction_count: row.try_get("interaction_count")?,
        first_seen,
        last_seen,
        metadata,
    })
}

#[cfg(test)]
pub(crate) async fn create_relationship_table(db: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TABLE user_relationships (
            id TEXT PRIMARY KEY,
            user_a TEXT NOT NULL,
            user_b TEXT NOT NULL,
            relationship_type TEXT NOT NULL,
            strength_score REAL NOT NULL DEFAULT 0,
            interaction_count INTEGER NOT NULL DEFAULT 1,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            UNIQUE(user_a, user_b, relationship_type)
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
    async fn test_canonical_edge_upsert() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_relationship_table(&db).await;
        let store = GraphStore::new(db);

        let first = store
            .record_edge("zed", "amy", RelationshipType::Transaction, 0.4, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(first.user_a, "amy");
        assert_eq!(first.user_b, "zed");
        assert_eq!(first.interaction_count, 1);

        // Same pair in the other order hits the same row.
        let second = store
            .record_edge("amy", "zed", RelationshipType::Transaction, 0.6, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.interaction_count, 2);
        assert!((second.strength_score - 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_neighbors_strength_floor() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_relationship_table(&db).await;
        let store = GraphStore::new(db);

        store
            .record_edge("u1", "u2", RelationshipType::Messaging, 0.8, serde_json::json!({}))
            .await
            .unwrap();
        store
            .record_edge("u1", "u3", RelationshipType::Messaging, 0.05, serde_json::json!({}))
            .await
            .unwrap();

        let edges = store.neighbors("u1", 0.1).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].other("u1"), "u2");
    }

    #[tokio::test]
    async fn test_neighborhood_depth_clamped() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_relationship_table(&db).await;
        let store = GraphStore::new(db);

        // A chain u1 - u2 - u3 - u4 - u5.
        for (a, b) in [("u1", "u2"), ("u2", "u3"), ("u3", "u4"), ("u4", "u5")] {
            store
                .record_edge(a, b, RelationshipType::Transaction, 0.9, serde_json::json!({}))
                .await
                .unwrap();
        }

        // Requested depth 9 clamps to 3: reaches u4, not u5.
        let view = store.neighborhood("u1", 9, 0.1).await.unwrap();
        assert_eq!(view.user_ids, vec!["u1", "u2", "u3", "u4"]);
        assert_eq!(view.edges.len(), 3);

        // Requested depth 0 clamps to 1.
        let view = store.neighborhood("u1", 0, 0.1).await.unwrap();
        assert_eq!(view.user_ids, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_shared_device_stores_hash_only() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_relationship_table(&db).await;
        let store = GraphStore::new(db);

        let edge = store
            .record_shared_device("u1", "u2", "android-serial-1234", 0.9)
            .await
            .unwrap();

        let hash = edge.metadata["device_hash"].as_str().unwrap();
        assert_eq!(hash.len(), 64);
        assert!(!edge.metadata.to_string().contains("android-serial-1234"));
    }

    #[tokio::test]
    async fn test_self_edge_rejected() {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_relationship_table(&db).await;
        let store = GraphStore::new(db);

        let result = store
            .record_edge("u1", "u1", RelationshipType::Messaging, 0.5, serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
