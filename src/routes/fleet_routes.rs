use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::controllers::{AlertController, FleetController};
use crate::dto::fleet_dto::{
    AlertsQuery, ApiResponse, DailyReportQuery, EfficiencyQuery, FleetStateQuery, TelemetryAccepted,
};
use crate::models::{Alert, DailyFuelReport, EfficiencyWindow, VehicleState};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_fleet_router() -> Router<AppState> {
    Router::new()
        .route("/state", get(fleet_state))
        .route("/reports/daily", get(daily_report))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id/ack", post(acknowledge_alert))
        .route("/telemetry/:tenant/:vehicle", post(ingest_telemetry))
        .route("/:id/state", get(vehicle_state))
        .route("/:id/efficiency", get(vehicle_efficiency))
}

async fn fleet_state(
    State(state): State<AppState>,
    Query(query): Query<FleetStateQuery>,
) -> Result<Json<Vec<VehicleState>>, AppError> {
    let controller = FleetController::new(state);
    let response = controller.fleet_state(query.tenant.as_deref()).await?;
    Ok(Json(response))
}

async fn vehicle_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VehicleState>, AppError> {
    let controller = FleetController::new(state);
    let response = controller.vehicle_state(&id).await?;
    Ok(Json(response))
}

async fn vehicle_efficiency(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EfficiencyQuery>,
) -> Result<Json<EfficiencyWindow>, AppError> {
    let controller = FleetController::new(state);
    let response = controller.efficiency(&id, query).await?;
    Ok(Json(response))
}

async fn daily_report(
    State(state): State<AppState>,
    Query(query): Query<DailyReportQuery>,
) -> Result<Json<DailyFuelReport>, AppError> {
    let controller = FleetController::new(state);
    let response = controller.daily_report(query).await?;
    Ok(Json(response))
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>, AppError> {
    let controller = AlertController::new(state.alerts.clone());
    let response = controller.list(query).await?;
    Ok(Json(response))
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Alert>>, AppError> {
    let controller = AlertController::new(state.alerts.clone());
    let response = controller.acknowledge(id).await?;
    Ok(Json(response))
}

async fn ingest_telemetry(
    State(state): State<AppState>,
    Path((tenant, vehicle)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<TelemetryAccepted>>), AppError> {
    let controller = FleetController::new(state);
    let response = controller.ingest(tenant, vehicle, body).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
