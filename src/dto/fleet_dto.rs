use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;


// Response genérica
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
        }
    }
}

// Filtro por tenant para el estado de la flota
#[derive(Debug, Default, Deserialize)]
pub struct FleetStateQuery {
    pub tenant: Option<String>,
}

// Ventana de eficiencia; sin fechas se usan los últimos 30 días
#[derive(Debug, Default, Deserialize)]
pub struct EfficiencyQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// Listado de alertas
#[derive(Debug, Default, Deserialize, Validate)]
pub struct AlertsQuery {
    /// Solo abiertas (por defecto) o también las reconocidas
    pub open: Option<bool>,
    pub tenant: Option<String>,
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<u32>,
}

// Suscripción al canal en vivo
#[derive(Debug, Default, Deserialize)]
pub struct LiveQuery {
    pub tenant: Option<String>,
    pub observer: Option<String>,
}

// Informe diario; sin fecha se usa el día anterior (UTC)
#[derive(Debug, Default, Deserialize)]
pub struct DailyReportQuery {
    pub date: Option<NaiveDate>,
    pub tenant: Option<String>,
}

// Lectura aceptada por la ingesta HTTP
#[derive(Debug, Serialize)]
pub struct TelemetryAccepted {
    pub tenant_id: String,
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
}

// Health check
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker: &'static str,
    pub vehicles: usize,
    pub observers: usize,
    pub uptime_seconds: i64,
    pub timestamp: DateTime<Utc>,
}
