/// API routes and handlers
pub mod alerts;
pub mod appeals;
pub mod audit;
pub mod enforcement;
pub mod graph;
pub mod health;
pub mod middleware;
pub mod scores;
pub mod signals;
pub mod subscriptions;

use crate::context::AppContext;
use axum::{routing::get, Router};

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .merge(health::routes())
        .merge(signals::routes())
        .merge(graph::routes())
        .merge(scores::routes())
        .merge(enforcement::routes())
        .merge(appeals::routes())
        .merge(alerts::routes())
        .merge(subscriptions::routes())
        .merge(audit::routes())
}

/// Prometheus text exposition endpoint
async fn serve_metrics() -> String {
    crate::metrics::render_metrics()
}
