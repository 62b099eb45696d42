use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Liveness plus a coarse health verdict. Answers 503 once a pair task
/// halted or the drawdown guard latched.
async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let healthy = state.engine.is_healthy().await;
    let halted: Vec<String> = state
        .engine
        .pairs()
        .await
        .into_iter()
        .filter(|p| p.task == common::PairTaskState::Halted)
        .map(|p| p.pair)
        .collect();

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "drawdown_halted": state.engine.drawdown_halted(),
            "halted_pairs": halted,
            "open_positions": state.engine.open_positions(),
        })),
    )
}
