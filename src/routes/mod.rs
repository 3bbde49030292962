//! Rutas de la API
//!
//! Este módulo arma el router completo: consultas de flota, alertas,
//! ingesta HTTP, canal en vivo, health check y métricas.

pub mod fleet_routes;
pub mod live_routes;

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::Utc;
use tower_http::trace::TraceLayer;

use crate::dto::fleet_dto::HealthResponse;
use crate::middleware::cors::cors_layer;
use crate::state::AppState;
use crate::utils::errors::AppError;

/// Router completo de la aplicación
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .nest(
            "/fleet",
            fleet_routes::create_fleet_router().merge(live_routes::create_live_router()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    let broker = state.broker_status();
    Json(HealthResponse {
        status: if broker == "disconnected" { "degraded" } else { "healthy" },
        broker,
        vehicles: state.store.len().await,
        observers: state.broadcaster.observer_count(),
        uptime_seconds: (now - state.started_at).num_seconds(),
        timestamp: now,
    })
}

async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .diagnostics
        .render()
        .map_err(|e| AppError::Internal(format!("metrics encoding failed: {}", e)))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
