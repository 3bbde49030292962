//! Modelo de estado en vivo del vehículo
//!
//! Este módulo contiene `VehicleState`, la foto actual de cada vehículo de la
//! flota. Solo el store de flota lo modifica.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::telemetry::{Position, TelemetryReading};

/// Estado de conectividad del vehículo
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityStatus {
    Online,
    Offline,
}

/// Estado en vivo de un vehículo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub vehicle_id: String,
    pub tenant_id: String,
    pub position: Option<Position>,
    /// Rumbo en grados; se conserva el último reportado
    pub heading: Option<f64>,
    pub speed_kmh: f64,
    pub fuel_level_liters: f64,
    pub engine_on: bool,
    pub last_update: DateTime<Utc>,
    pub status: ConnectivityStatus,
    /// Inicio del tramo actual parado con el motor encendido
    pub idle_since: Option<DateTime<Utc>>,
}

impl VehicleState {
    /// Estado inicial a partir de la primera lectura vista
    pub fn from_reading(reading: &TelemetryReading) -> Self {
        Self {
            vehicle_id: reading.vehicle_id.clone(),
            tenant_id: reading.tenant_id.clone(),
            position: reading.position,
            heading: reading.heading,
            speed_kmh: reading.speed_kmh,
            fuel_level_liters: reading.fuel_level_liters,
            engine_on: reading.engine_on,
            last_update: reading.timestamp,
            status: ConnectivityStatus::Online,
            idle_since: reading.is_idling().then_some(reading.timestamp),
        }
    }

    /// Aplica una lectura más reciente; toda lectura aplicada deja el vehículo ONLINE
    pub fn apply(&mut self, reading: &TelemetryReading) {
        // Sin fix GPS se conserva la última posición conocida
        if reading.position.is_some() {
            self.position = reading.position;
        }
        if reading.heading.is_some() {
            self.heading = reading.heading;
        }
        self.idle_since = match (reading.is_idling(), self.idle_since) {
            (true, Some(since)) => Some(since),
            (true, None) => Some(reading.timestamp),
            (false, _) => None,
        };
        self.speed_kmh = reading.speed_kmh;
        self.fuel_level_liters = reading.fuel_level_liters;
        self.engine_on = reading.engine_on;
        self.last_update = reading.timestamp;
        self.status = ConnectivityStatus::Online;
    }

    pub fn is_online(&self) -> bool {
        self.status == ConnectivityStatus::Online
    }

    /// El vehículo está parado con el motor apagado
    pub fn is_parked(&self) -> bool {
        !self.engine_on && self.speed_kmh <= f64::EPSILON
    }

    /// Parado con el motor encendido
    pub fn is_idling(&self) -> bool {
        self.engine_on && self.speed_kmh <= f64::EPSILON
    }

    /// Minutos que lleva en ralentí en el instante de la última lectura
    pub fn idle_minutes(&self) -> f64 {
        self.idle_since
            .map(|since| (self.last_update - since).num_milliseconds() as f64 / 60_000.0)
            .unwrap_or(0.0)
    }
}
