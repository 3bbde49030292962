//! Monitor de condiciones del vehículo
//!
//! Evalúa cada estado nuevo contra las reglas de operación: exceso de
//! velocidad, nivel de combustible bajo o crítico y ralentí prolongado.
//! Las alertas se disparan en el flanco, cuando la condición empieza, no en
//! cada lectura mientras se mantiene.

use crate::config::{AlertRules, FleetConfig};
use crate::models::{AlertKind, AlertSeverity, VehicleState};

/// Banda de nivel de combustible, ordenada de mejor a peor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FuelBand {
    Normal,
    Low,
    Critical,
}

#[derive(Debug, Clone)]
pub struct ConditionMonitor {
    rules: AlertRules,
    tank_capacity_liters: f64,
}

impl ConditionMonitor {
    pub fn new(rules: AlertRules, tank_capacity_liters: f64) -> Self {
        Self {
            rules,
            tank_capacity_liters,
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.rules.clone(), config.tank_capacity_liters)
    }

    /// Condiciones que empiezan con `current`; `previous` es el estado antes del upsert
    pub fn evaluate(
        &self,
        previous: Option<&VehicleState>,
        current: &VehicleState,
    ) -> Vec<(AlertKind, AlertSeverity, String)> {
        let mut raised = Vec::new();

        let limit = self.rules.speed_limit_kmh;
        if current.speed_kmh > limit && previous.map_or(true, |p| p.speed_kmh <= limit) {
            raised.push((
                AlertKind::Speeding,
                AlertSeverity::Warning,
                format!(
                    "Speed limit exceeded on {}: {:.0} km/h (limit {:.0} km/h)",
                    current.vehicle_id, current.speed_kmh, limit
                ),
            ));
        }

        let band = self.fuel_band(current);
        let previous_band = previous.map_or(FuelBand::Normal, |p| self.fuel_band(p));
        if band > previous_band {
            let percent = self.fuel_percent(current);
            match band {
                FuelBand::Low => raised.push((
                    AlertKind::LowFuel,
                    AlertSeverity::Warning,
                    format!("Low fuel on {}: {:.1}% of tank left", current.vehicle_id, percent),
                )),
                FuelBand::Critical => raised.push((
                    AlertKind::FuelCritical,
                    AlertSeverity::Critical,
                    format!("Fuel critically low on {}: {:.1}% of tank left", current.vehicle_id, percent),
                )),
                FuelBand::Normal => {}
            }
        }

        let idle_limit = self.rules.idle_alert_minutes;
        let idle = current.idle_minutes();
        if idle >= idle_limit && previous.map_or(true, |p| p.idle_minutes() < idle_limit) {
            raised.push((
                AlertKind::ExtendedIdle,
                AlertSeverity::Info,
                format!(
                    "Extended idling on {}: engine running while stopped for {:.0} minutes",
                    current.vehicle_id, idle
                ),
            ));
        }

        raised
    }

    fn fuel_percent(&self, state: &VehicleState) -> f64 {
        state.fuel_level_liters / self.tank_capacity_liters * 100.0
    }

    fn fuel_band(&self, state: &VehicleState) -> FuelBand {
        let percent = self.fuel_percent(state);
        if percent < self.rules.critical_fuel_percent {
            FuelBand::Critical
        } else if percent < self.rules.low_fuel_percent {
            FuelBand::Low
        } else {
            FuelBand::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectivityStatus;
    use chrono::{DateTime, Duration, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn state(minute: i64, speed: f64, fuel: f64) -> VehicleState {
        VehicleState {
            vehicle_id: "bus-7".to_string(),
            tenant_id: "school-1".to_string(),
            position: None,
            heading: None,
            speed_kmh: speed,
            fuel_level_liters: fuel,
            engine_on: true,
            last_update: t0() + Duration::minutes(minute),
            status: ConnectivityStatus::Online,
            idle_since: None,
        }
    }

    fn kinds(raised: &[(AlertKind, AlertSeverity, String)]) -> Vec<AlertKind> {
        raised.iter().map(|(kind, _, _)| *kind).collect()
    }

    fn monitor() -> ConditionMonitor {
        ConditionMonitor::new(AlertRules::default(), 100.0)
    }

    #[test]
    fn test_speeding_fires_on_crossing_only() {
        let m = monitor();
        let raised = m.evaluate(Some(&state(0, 70.0, 50.0)), &state(1, 95.0, 50.0));
        assert_eq!(kinds(&raised), vec![AlertKind::Speeding]);
        assert_eq!(raised[0].1, AlertSeverity::Warning);

        // Sigue por encima: no se repite
        assert!(m.evaluate(Some(&state(1, 95.0, 50.0)), &state(2, 100.0, 50.0)).is_empty());
        // Exactamente en el límite no es exceso
        assert!(m.evaluate(Some(&state(2, 60.0, 50.0)), &state(3, 80.0, 50.0)).is_empty());
    }

    #[test]
    fn test_fuel_bands_escalate() {
        let m = monitor();
        let low = m.evaluate(Some(&state(0, 40.0, 25.0)), &state(1, 40.0, 19.0));
        assert_eq!(kinds(&low), vec![AlertKind::LowFuel]);
        assert_eq!(low[0].1, AlertSeverity::Warning);

        assert!(m.evaluate(Some(&state(1, 40.0, 19.0)), &state(2, 40.0, 15.0)).is_empty());

        let critical = m.evaluate(Some(&state(2, 40.0, 15.0)), &state(3, 40.0, 9.5));
        assert_eq!(kinds(&critical), vec![AlertKind::FuelCritical]);
        assert_eq!(critical[0].1, AlertSeverity::Critical);
    }

    #[test]
    fn test_first_reading_already_critical() {
        let raised = monitor().evaluate(None, &state(0, 0.0, 5.0));
        assert_eq!(kinds(&raised), vec![AlertKind::FuelCritical]);
    }

    #[test]
    fn test_extended_idle_fires_once_when_threshold_is_reached() {
        let m = monitor();
        let mut previous = state(9, 0.0, 50.0);
        previous.idle_since = Some(t0());
        let mut current = state(10, 0.0, 50.0);
        current.idle_since = Some(t0());

        let raised = m.evaluate(Some(&previous), &current);
        assert_eq!(kinds(&raised), vec![AlertKind::ExtendedIdle]);
        assert_eq!(raised[0].1, AlertSeverity::Info);

        let mut later = state(15, 0.0, 50.0);
        later.idle_since = Some(t0());
        assert!(m.evaluate(Some(&current), &later).is_empty());
    }
}
