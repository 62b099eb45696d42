use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::warn;

use crate::AppState;

pub fn status_router() -> Router<AppState> {
    Router::new()
        .route("/positions", get(get_positions))
        .route("/stats", get(get_stats))
}

// ─── Positions ────────────────────────────────────────────────────────────────

async fn get_positions(State(state): State<AppState>) -> Json<Value> {
    let pairs = state.engine.pairs().await;
    let open = pairs.iter().filter(|p| p.position.is_open()).count();
    Json(json!({
        "pairs": pairs,
        "total_open": open,
    }))
}

// ─── Stats ────────────────────────────────────────────────────────────────────

async fn get_stats(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.journal.performance().await {
        Ok(summary) => (StatusCode::OK, Json(json!(summary))),
        Err(e) => {
            warn!(error = %e, "Failed to read trade journal");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "trade journal unavailable" })),
            )
        }
    }
}
