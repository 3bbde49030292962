use axum::body::Bytes;
use chrono::{Duration, Utc};

use crate::dto::fleet_dto::{ApiResponse, DailyReportQuery, EfficiencyQuery, TelemetryAccepted};
use crate::models::{DailyFuelReport, EfficiencyWindow, VehicleState};
use crate::services::ingestion_service::DispatchError;
use crate::services::TopicAddress;
use crate::state::AppState;
use crate::utils::errors::{not_found_error, AppError};

const DEFAULT_EFFICIENCY_DAYS: i64 = 30;

pub struct FleetController {
    state: AppState,
}

impl FleetController {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn fleet_state(&self, tenant: Option<&str>) -> Result<Vec<VehicleState>, AppError> {
        Ok(self
            .state
            .store
            .list_all()
            .await
            .into_iter()
            .filter(|v| tenant.map_or(true, |t| v.tenant_id == t))
            .collect())
    }

    pub async fn vehicle_state(&self, vehicle_id: &str) -> Result<VehicleState, AppError> {
        self.state
            .store
            .get(vehicle_id)
            .await
            .ok_or_else(|| not_found_error("Vehicle", vehicle_id))
    }

    pub async fn efficiency(&self, vehicle_id: &str, query: EfficiencyQuery) -> Result<EfficiencyWindow, AppError> {
        let to = query.to.unwrap_or_else(Utc::now);
        let from = query.from.unwrap_or(to - Duration::days(DEFAULT_EFFICIENCY_DAYS));
        self.state.efficiency.compute_efficiency(vehicle_id, from, to).await
    }

    pub async fn daily_report(&self, query: DailyReportQuery) -> Result<DailyFuelReport, AppError> {
        let reports = &self.state.reports;
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        let date = query.date.unwrap_or(yesterday);

        if query.tenant.is_none() {
            if let Some(latest) = reports.latest().await.filter(|r| r.date == date) {
                return Ok(latest);
            }
        }
        reports.daily_summary(date, query.tenant.as_deref()).await
    }

    /// Ingesta HTTP: decodifica en línea y encola para los workers
    pub async fn ingest(
        &self,
        tenant_id: String,
        vehicle_id: String,
        body: Bytes,
    ) -> Result<ApiResponse<TelemetryAccepted>, AppError> {
        let diagnostics = &self.state.diagnostics;
        diagnostics.telemetry_received.inc();

        let address = TopicAddress { tenant_id, vehicle_id };
        let reading = match self.state.decoder.decode_payload(&address, &body, Utc::now()) {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!("🗑️ Telemetría HTTP descartada de {}: {}", address.topic(), e);
                diagnostics.telemetry_rejected.with_label_values(&[e.reason()]).inc();
                return Err(e.into());
            }
        };

        let accepted = TelemetryAccepted {
            tenant_id: reading.tenant_id.clone(),
            vehicle_id: reading.vehicle_id.clone(),
            timestamp: reading.timestamp,
        };
        self.state.dispatcher.try_dispatch(reading).map_err(|e| match e {
            DispatchError::QueueFull => AppError::ServiceUnavailable("Ingestion queue is full, retry later".to_string()),
            DispatchError::Closed => AppError::ServiceUnavailable("Ingestion is shutting down".to_string()),
        })?;

        Ok(ApiResponse::success_with_message(
            accepted,
            "Telemetry accepted".to_string(),
        ))
    }
}
