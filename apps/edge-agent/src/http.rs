use crate::stats::{AgentStats, StatsSnapshot};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

#[derive(Clone)]
pub struct HttpState {
    pub stats: Arc<AgentStats>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_status(State(state): State<HttpState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status))
        .with_state(state)
}
