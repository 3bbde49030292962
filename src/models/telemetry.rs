//! Modelo de lectura de telemetría
//!
//! Una lectura es el reporte inmutable que produce el decodificador a partir
//! de un mensaje del dispositivo embarcado.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Posición GPS en grados decimales
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Lectura de telemetría validada y normalizada
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub tenant_id: String,
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
    /// `None` cuando el dispositivo no tenía fix GPS
    pub position: Option<Position>,
    pub speed_kmh: f64,
    pub fuel_level_liters: f64,
    pub engine_on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub odometer_km: Option<f64>,
}

impl TelemetryReading {
    /// El vehículo está parado con el motor apagado
    pub fn is_parked(&self) -> bool {
        !self.engine_on && self.speed_kmh <= f64::EPSILON
    }

    /// Parado con el motor encendido
    pub fn is_idling(&self) -> bool {
        self.engine_on && self.speed_kmh <= f64::EPSILON
    }
}
