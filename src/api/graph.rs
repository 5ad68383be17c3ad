/// Relationship graph endpoints
///
/// Edges feed the network factor of scoring: a user connected to
/// high-risk accounts inherits part of that risk. The graph view
/// decorates each reachable user with their latest score and any
/// active enforcement so an investigator can read the cluster at a
/// glance.
use crate::{
    context::AppContext,
    error::EngineResult,
    graph::{RelationshipType, UserRelationship},
    scoring::RiskTier,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Request body for recording a relationship edge
#[derive(Debug, Deserialize)]
pub struct EdgeRequest {
    pub user_a: String,
    pub user_b: String,
    pub relationship_type: RelationshipType,
    pub strength_score: f64,
    /// Raw device identifier. Only meaningful for shared_device edges;
    /// it is hashed before storage and never persisted in the clear.
    pub device_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Query parameters for the graph view
#[derive(Debug, Deserialize)]
pub struct GraphViewParams {
    /// Walk depth, clamped to 1..=3 (default: 1)
    pub depth: Option<u32>,
    /// Minimum edge strength (default: scoring policy floor)
    pub min_strength: Option<f64>,
}

/// One user in the graph view
#[derive(Debug, Serialize)]
pub struct GraphNode {
    pub user_id: String,
    /// Latest composite score, if one has been computed
    pub score: Option<f64>,
    pub tier: Option<RiskTier>,
    /// Active enforcement action type, or "none"
    pub status: String,
}

/// Graph view response
#[derive(Debug, Serialize)]
pub struct GraphView {
    pub root: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<UserRelationship>,
}

/// Record or strengthen a relationship edge
///
/// Repeated observations of the same pair upsert the edge and bump its
/// interaction count.
pub async fn record_relationship(
    State(ctx): State<AppContext>,
    Json(body): Json<EdgeRequest>,
) -> EngineResult<Json<UserRelationship>> {
    let edge = match (&body.relationship_type, &body.device_id) {
        (RelationshipType::SharedDevice, Some(device_id)) => {
            ctx.graph
                .record_shared_device(&body.user_a, &body.user_b, device_id, body.strength_score)
                .await?
        }
        _ => {
            ctx.graph
                .record_edge(
                    &body.user_a,
                    &body.user_b,
                    body.relationship_type,
                    body.strength_score,
                    body.metadata,
                )
                .await?
        }
    };

    Ok(Json(edge))
}

/// Walk a user's neighborhood and decorate it with risk state
pub async fn graph_view(
    State(ctx): State<AppContext>,
    Path(user_id): Path<String>,
    Query(params): Query<GraphViewParams>,
) -> EngineResult<Json<GraphView>> {
    let depth = params.depth.unwrap_or(1);
    let min_strength = params
        .min_strength
        .unwrap_or(ctx.config.scoring.min_edge_strength);

    let neighborhood = ctx.graph.neighborhood(&user_id, depth, min_strength).await?;

    let mut nodes = Vec::with_capacity(neighborhood.user_ids.len());
    for id in &neighborhood.user_ids {
        let score = ctx.scores.latest(id).await?;
        let active = ctx.actions.active_action(id).await?;
        nodes.push(GraphNode {
            user_id: id.clone(),
            score: score.as_ref().map(|s| s.score),
            tier: score.as_ref().map(|s| s.tier),
            status: active
                .map(|a| a.action_type.as_str().to_string())
                .unwrap_or_else(|| "none".to_string()),
        });
    }

    Ok(Json(GraphView {
        root: user_id,
        nodes,
        edges: neighborhood.edges,
    }))
}

/// Build graph routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/relationships", post(record_relationship))
        .route("/api/users/:id/graph", get(graph_view))
}
