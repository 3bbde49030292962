//! Detector de eventos de combustible
//!
//! Clasifica la variación de combustible entre dos estados consecutivos en
//! repostaje, caída anómala (robo o fuga) o consumo normal. Es una función
//! pura sobre (estado previo, estado nuevo, umbrales).
//!
//! Los consumos normales pueden llevar además una marca: excesivo en marcha
//! o quemado en ralentí.

use chrono::{DateTime, Utc};

use crate::config::{FleetConfig, FuelThresholds};
use crate::models::{
    AlertKind, AlertSeverity, ConsumptionFlag, FuelEvent, FuelEventKind, TelemetryReading, VehicleState,
};

/// Lo mínimo que el detector necesita de un estado o lectura
#[derive(Debug, Clone, Copy)]
struct FuelSample {
    at: DateTime<Utc>,
    fuel_liters: f64,
    parked: bool,
    idling: bool,
}

impl From<&VehicleState> for FuelSample {
    fn from(state: &VehicleState) -> Self {
        Self {
            at: state.last_update,
            fuel_liters: state.fuel_level_liters,
            parked: state.is_parked(),
            idling: state.is_idling(),
        }
    }
}

impl From<&TelemetryReading> for FuelSample {
    fn from(reading: &TelemetryReading) -> Self {
        Self {
            at: reading.timestamp,
            fuel_liters: reading.fuel_level_liters,
            parked: reading.is_parked(),
            idling: reading.is_idling(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FuelEventDetector {
    thresholds: FuelThresholds,
    tank_capacity_liters: f64,
}

impl FuelEventDetector {
    pub fn new(thresholds: FuelThresholds, tank_capacity_liters: f64) -> Self {
        Self {
            thresholds,
            tank_capacity_liters,
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.thresholds.clone(), config.tank_capacity_liters)
    }

    /// Clasifica el paso `previous` → `current` de un upsert.
    /// `None` si no transcurrió tiempo entre ambos.
    pub fn classify(&self, previous: &VehicleState, current: &VehicleState) -> Option<FuelEvent> {
        self.classify_samples(&current.vehicle_id, previous.into(), current.into())
    }

    /// Misma clasificación sobre dos lecturas del historial
    pub fn classify_readings(&self, previous: &TelemetryReading, current: &TelemetryReading) -> Option<FuelEvent> {
        self.classify_samples(&current.vehicle_id, previous.into(), current.into())
    }

    fn classify_samples(&self, vehicle_id: &str, previous: FuelSample, current: FuelSample) -> Option<FuelEvent> {
        let delta_fuel = current.fuel_liters - previous.fuel_liters;
        let delta_minutes = (current.at - previous.at).num_milliseconds() as f64 / 60_000.0;
        if delta_minutes <= 0.0 {
            return None;
        }
        let rate = delta_fuel.abs() / delta_minutes;

        let refuel_min = self.thresholds.refuel_min_liters(self.tank_capacity_liters);
        let drop_min = self.thresholds.drop_min_liters(self.tank_capacity_liters);
        // Parado y con el motor apagado ningún consumo es plausible
        let plausible_rate = if previous.parked && current.parked {
            0.0
        } else {
            self.thresholds.max_plausible_rate
        };

        let kind = if delta_fuel >= refuel_min && delta_minutes <= self.thresholds.refuel_max_minutes {
            FuelEventKind::Refuel
        } else if delta_fuel <= -drop_min && rate > plausible_rate {
            FuelEventKind::Drop
        } else {
            FuelEventKind::Normal
        };

        let flag = match kind {
            FuelEventKind::Normal if delta_fuel < 0.0 => {
                self.flag_consumption(&previous, &current, -delta_fuel, rate, delta_minutes)
            }
            _ => None,
        };

        Some(FuelEvent {
            vehicle_id: vehicle_id.to_string(),
            timestamp: current.at,
            kind,
            magnitude: delta_fuel,
            rate,
            flag,
        })
    }

    fn flag_consumption(
        &self,
        previous: &FuelSample,
        current: &FuelSample,
        burned: f64,
        rate: f64,
        delta_minutes: f64,
    ) -> Option<ConsumptionFlag> {
        let t = &self.thresholds;
        if burned > t.excessive_min_liters && rate * 60.0 > t.excessive_rate_lph {
            Some(ConsumptionFlag::Excessive)
        } else if previous.idling
            && current.idling
            && burned > t.idle_burn_min_liters
            && delta_minutes > t.idle_burn_min_minutes
        {
            Some(ConsumptionFlag::Idle)
        } else {
            None
        }
    }
}

/// Alerta que corresponde a un evento; NORMAL no genera alerta
pub fn alert_for(event: &FuelEvent) -> Option<(AlertKind, AlertSeverity, String)> {
    match event.kind {
        FuelEventKind::Refuel => Some((
            AlertKind::FuelRefuelAnomaly,
            AlertSeverity::Info,
            format!(
                "Refuel detected on {}: {:.1} L added ({:.2} L/min)",
                event.vehicle_id, event.magnitude, event.rate
            ),
        )),
        FuelEventKind::Drop => Some((
            AlertKind::FuelDrop,
            AlertSeverity::Critical,
            format!(
                "Suspected fuel theft or leak on {}: {:.1} L lost at {:.2} L/min",
                event.vehicle_id,
                event.magnitude.abs(),
                event.rate
            ),
        )),
        FuelEventKind::Normal => match event.flag? {
            ConsumptionFlag::Excessive => Some((
                AlertKind::ExcessiveConsumption,
                AlertSeverity::Warning,
                format!(
                    "Excessive fuel consumption on {}: {:.1} L at {:.1} L/h",
                    event.vehicle_id,
                    event.magnitude.abs(),
                    event.rate * 60.0
                ),
            )),
            ConsumptionFlag::Idle => Some((
                AlertKind::IdleConsumption,
                AlertSeverity::Warning,
                format!(
                    "Fuel burned while idling on {}: {:.1} L with the vehicle stopped",
                    event.vehicle_id,
                    event.magnitude.abs()
                ),
            )),
        },
    }
}
