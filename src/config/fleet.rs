//! Configuración del motor de telemetría
//!
//! Umbrales de detección de combustible, ventanas de alertas, temporizadores
//! del watchdog y tamaños de colas. Cada opción tiene un valor por defecto
//! y se puede sobreescribir desde el entorno.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::environment::{env_or, ConfigError};

/// Unidades en las que se expresan los umbrales de repostaje y caída
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdUnits {
    /// Litros absolutos
    Liters,
    /// Porcentaje de la capacidad del tanque
    Percent,
}

impl FromStr for ThresholdUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "liters" | "litres" | "l" => Ok(Self::Liters),
            "percent" | "pct" | "%" => Ok(Self::Percent),
            other => Err(format!("expected 'liters' or 'percent', got '{}'", other)),
        }
    }
}

/// Umbrales del detector de eventos de combustible
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuelThresholds {
    /// Subida mínima para considerar un repostaje (`REFUEL_MIN_LITERS`)
    pub refuel_min: f64,
    /// Ventana máxima en minutos de un repostaje (`REFUEL_MAX_MINUTES`)
    pub refuel_max_minutes: f64,
    /// Bajada mínima para considerar una caída anómala (`DROP_MIN_LITERS`)
    pub drop_min: f64,
    /// Consumo máximo plausible en litros/minuto (`MAX_PLAUSIBLE_CONSUMPTION_RATE`)
    pub max_plausible_rate: f64,
    pub units: ThresholdUnits,
    /// Consumo normal que ya se considera excesivo, en litros/hora (`EXCESSIVE_CONSUMPTION_LPH`)
    pub excessive_rate_lph: f64,
    /// Bajada mínima para evaluar consumo excesivo (`EXCESSIVE_CONSUMPTION_MIN_LITERS`)
    pub excessive_min_liters: f64,
    /// Litros quemados en ralentí que merecen aviso (`IDLE_BURN_MIN_LITERS`)
    pub idle_burn_min_liters: f64,
    /// Duración mínima del tramo en ralentí (`IDLE_BURN_MIN_MINUTES`)
    pub idle_burn_min_minutes: f64,
}

impl Default for FuelThresholds {
    fn default() -> Self {
        Self {
            refuel_min: 5.0,
            refuel_max_minutes: 15.0,
            drop_min: 3.0,
            max_plausible_rate: 0.5,
            units: ThresholdUnits::Liters,
            excessive_rate_lph: 15.0,
            excessive_min_liters: 2.0,
            idle_burn_min_liters: 0.5,
            idle_burn_min_minutes: 30.0,
        }
    }
}

impl FuelThresholds {
    /// Subida mínima de repostaje en litros para un tanque dado
    pub fn refuel_min_liters(&self, tank_capacity: f64) -> f64 {
        self.to_liters(self.refuel_min, tank_capacity)
    }

    /// Bajada mínima de caída en litros para un tanque dado
    pub fn drop_min_liters(&self, tank_capacity: f64) -> f64 {
        self.to_liters(self.drop_min, tank_capacity)
    }

    fn to_liters(&self, value: f64, tank_capacity: f64) -> f64 {
        match self.units {
            ThresholdUnits::Liters => value,
            ThresholdUnits::Percent => tank_capacity * value / 100.0,
        }
    }
}

/// Reglas de alerta sobre el estado del vehículo (velocidad, nivel, ralentí)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRules {
    /// `SPEED_LIMIT_KMH`
    pub speed_limit_kmh: f64,
    /// Porcentaje del tanque por debajo del cual el nivel es bajo (`LOW_FUEL_PERCENT`)
    pub low_fuel_percent: f64,
    /// `CRITICAL_FUEL_PERCENT`
    pub critical_fuel_percent: f64,
    /// Minutos parado con el motor encendido (`IDLE_ALERT_MINUTES`)
    pub idle_alert_minutes: f64,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            speed_limit_kmh: 80.0,
            low_fuel_percent: 20.0,
            critical_fuel_percent: 10.0,
            idle_alert_minutes: 10.0,
        }
    }
}

/// Configuración completa del motor de flota
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub thresholds: FuelThresholds,
    pub rules: AlertRules,
    pub alert_cooldown: Duration,
    /// Tiempo máximo de cada escritura de alerta en el repositorio
    pub alert_persist_timeout: StdDuration,
    pub offline_timeout: Duration,
    pub watchdog_interval: StdDuration,
    pub tank_capacity_liters: f64,
    pub max_speed_kmh: f64,
    pub max_clock_skew: Duration,
    pub history_capacity: usize,
    pub history_retention: Duration,
    pub observer_queue_capacity: usize,
    pub ingest_workers: usize,
    pub ingest_queue_capacity: usize,
    pub topic_pattern: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            thresholds: FuelThresholds::default(),
            rules: AlertRules::default(),
            alert_cooldown: Duration::minutes(30),
            alert_persist_timeout: StdDuration::from_secs(5),
            offline_timeout: Duration::seconds(300),
            watchdog_interval: StdDuration::from_secs(60),
            tank_capacity_liters: 100.0,
            max_speed_kmh: 200.0,
            max_clock_skew: Duration::seconds(300),
            history_capacity: 10_000,
            history_retention: Duration::hours(2160),
            observer_queue_capacity: 256,
            ingest_workers: 4,
            ingest_queue_capacity: 1024,
            topic_pattern: "tenant/*/vehicles/*/telemetry".to_string(),
        }
    }
}

impl FleetConfig {
    /// Construir la configuración del motor desde el entorno
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            thresholds: FuelThresholds {
                refuel_min: env_or("REFUEL_MIN_LITERS", d.thresholds.refuel_min)?,
                refuel_max_minutes: env_or("REFUEL_MAX_MINUTES", d.thresholds.refuel_max_minutes)?,
                drop_min: env_or("DROP_MIN_LITERS", d.thresholds.drop_min)?,
                max_plausible_rate: env_or(
                    "MAX_PLAUSIBLE_CONSUMPTION_RATE",
                    d.thresholds.max_plausible_rate,
                )?,
                units: env_or("FUEL_THRESHOLD_UNITS", d.thresholds.units)?,
                excessive_rate_lph: env_or("EXCESSIVE_CONSUMPTION_LPH", d.thresholds.excessive_rate_lph)?,
                excessive_min_liters: env_or(
                    "EXCESSIVE_CONSUMPTION_MIN_LITERS",
                    d.thresholds.excessive_min_liters,
                )?,
                idle_burn_min_liters: env_or("IDLE_BURN_MIN_LITERS", d.thresholds.idle_burn_min_liters)?,
                idle_burn_min_minutes: env_or("IDLE_BURN_MIN_MINUTES", d.thresholds.idle_burn_min_minutes)?,
            },
            rules: AlertRules {
                speed_limit_kmh: env_or("SPEED_LIMIT_KMH", d.rules.speed_limit_kmh)?,
                low_fuel_percent: env_or("LOW_FUEL_PERCENT", d.rules.low_fuel_percent)?,
                critical_fuel_percent: env_or("CRITICAL_FUEL_PERCENT", d.rules.critical_fuel_percent)?,
                idle_alert_minutes: env_or("IDLE_ALERT_MINUTES", d.rules.idle_alert_minutes)?,
            },
            alert_cooldown: Duration::minutes(env_or("ALERT_COOLDOWN_MINUTES", 30i64)?),
            alert_persist_timeout: StdDuration::from_millis(env_or("ALERT_PERSIST_TIMEOUT_MS", 5000u64)?),
            offline_timeout: Duration::seconds(env_or("OFFLINE_TIMEOUT_SECONDS", 300i64)?),
            watchdog_interval: StdDuration::from_secs(env_or("WATCHDOG_INTERVAL_SECONDS", 60u64)?),
            tank_capacity_liters: env_or("TANK_CAPACITY_LITERS", d.tank_capacity_liters)?,
            max_speed_kmh: env_or("MAX_SPEED_KMH", d.max_speed_kmh)?,
            max_clock_skew: Duration::seconds(env_or("MAX_CLOCK_SKEW_SECONDS", 300i64)?),
            history_capacity: env_or("HISTORY_CAPACITY", d.history_capacity)?,
            history_retention: Duration::hours(env_or("HISTORY_RETENTION_HOURS", 2160i64)?),
            observer_queue_capacity: env_or("OBSERVER_QUEUE_CAPACITY", d.observer_queue_capacity)?,
            ingest_workers: env_or("INGEST_WORKERS", d.ingest_workers)?,
            ingest_queue_capacity: env_or("INGEST_QUEUE_CAPACITY", d.ingest_queue_capacity)?,
            topic_pattern: env_or("TELEMETRY_TOPIC_PATTERN", d.topic_pattern)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("REFUEL_MIN_LITERS", self.thresholds.refuel_min),
            ("REFUEL_MAX_MINUTES", self.thresholds.refuel_max_minutes),
            ("DROP_MIN_LITERS", self.thresholds.drop_min),
            ("MAX_PLAUSIBLE_CONSUMPTION_RATE", self.thresholds.max_plausible_rate),
            ("TANK_CAPACITY_LITERS", self.tank_capacity_liters),
            ("MAX_SPEED_KMH", self.max_speed_kmh),
            ("EXCESSIVE_CONSUMPTION_LPH", self.thresholds.excessive_rate_lph),
            ("EXCESSIVE_CONSUMPTION_MIN_LITERS", self.thresholds.excessive_min_liters),
            ("IDLE_BURN_MIN_LITERS", self.thresholds.idle_burn_min_liters),
            ("IDLE_BURN_MIN_MINUTES", self.thresholds.idle_burn_min_minutes),
            ("SPEED_LIMIT_KMH", self.rules.speed_limit_kmh),
            ("LOW_FUEL_PERCENT", self.rules.low_fuel_percent),
            ("CRITICAL_FUEL_PERCENT", self.rules.critical_fuel_percent),
            ("IDLE_ALERT_MINUTES", self.rules.idle_alert_minutes),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be a positive number".to_string(),
                });
            }
        }

        // Un enfriamiento negativo desactiva la deduplicación y un timeout nulo
        // marca toda la flota OFFLINE en cada pasada
        let positive_durations = [
            ("ALERT_COOLDOWN_MINUTES", self.alert_cooldown),
            ("OFFLINE_TIMEOUT_SECONDS", self.offline_timeout),
            ("MAX_CLOCK_SKEW_SECONDS", self.max_clock_skew),
            ("HISTORY_RETENTION_HOURS", self.history_retention),
        ];
        for (key, value) in positive_durations {
            if value <= Duration::zero() {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be a positive duration".to_string(),
                });
            }
        }

        if self.rules.critical_fuel_percent >= self.rules.low_fuel_percent || self.rules.low_fuel_percent > 100.0 {
            return Err(ConfigError::Invalid {
                key: "CRITICAL_FUEL_PERCENT",
                value: self.rules.critical_fuel_percent.to_string(),
                reason: format!(
                    "must be below LOW_FUEL_PERCENT ({}), which must not exceed 100",
                    self.rules.low_fuel_percent
                ),
            });
        }

        let non_zero = [
            ("WATCHDOG_INTERVAL_SECONDS", self.watchdog_interval.as_millis() as usize),
            ("ALERT_PERSIST_TIMEOUT_MS", self.alert_persist_timeout.as_millis() as usize),
            ("HISTORY_CAPACITY", self.history_capacity),
            ("OBSERVER_QUEUE_CAPACITY", self.observer_queue_capacity),
            ("INGEST_WORKERS", self.ingest_workers),
            ("INGEST_QUEUE_CAPACITY", self.ingest_queue_capacity),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}
