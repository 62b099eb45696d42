pub mod routes;

use std::net::SocketAddr;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use common::Result;
use engine::{EngineHandle, TradeJournal};

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub journal: TradeJournal,
}

/// All read-only status routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(routes::health_router())
        .merge(routes::status_router())
        .with_state(state)
        .layer(cors)
}

/// Bind and run the status server until the task is aborted.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Status API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
