use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Consumo de un vehículo en un día
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleFuelSummary {
    pub vehicle_id: String,
    pub tenant_id: String,
    pub fuel_consumed_liters: f64,
    pub distance_km: f64,
    pub km_per_liter: Option<f64>,
}

/// Resumen diario de combustible de la flota (día UTC completo).
/// Solo incluye vehículos que consumieron combustible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyFuelReport {
    pub date: NaiveDate,
    pub tenant_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub vehicles: Vec<VehicleFuelSummary>,
    pub total_fuel_consumed_liters: f64,
    pub total_distance_km: f64,
}
