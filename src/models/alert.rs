//! Modelo de alerta
//!
//! Las alertas las crea el gestor de alertas y solo cambian al ser
//! reconocidas desde el dashboard.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tipo de alerta - también forma parte de la clave de deduplicación
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    FuelDrop,
    FuelRefuelAnomaly,
    Offline,
    Speeding,
    LowFuel,
    FuelCritical,
    ExtendedIdle,
    ExcessiveConsumption,
    IdleConsumption,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::FuelDrop => "FUEL_DROP",
            AlertKind::FuelRefuelAnomaly => "FUEL_REFUEL_ANOMALY",
            AlertKind::Offline => "OFFLINE",
            AlertKind::Speeding => "SPEEDING",
            AlertKind::LowFuel => "LOW_FUEL",
            AlertKind::FuelCritical => "FUEL_CRITICAL",
            AlertKind::ExtendedIdle => "EXTENDED_IDLE",
            AlertKind::ExcessiveConsumption => "EXCESSIVE_CONSUMPTION",
            AlertKind::IdleConsumption => "IDLE_CONSUMPTION",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FUEL_DROP" => Ok(AlertKind::FuelDrop),
            "FUEL_REFUEL_ANOMALY" => Ok(AlertKind::FuelRefuelAnomaly),
            "OFFLINE" => Ok(AlertKind::Offline),
            "SPEEDING" => Ok(AlertKind::Speeding),
            "LOW_FUEL" => Ok(AlertKind::LowFuel),
            "FUEL_CRITICAL" => Ok(AlertKind::FuelCritical),
            "EXTENDED_IDLE" => Ok(AlertKind::ExtendedIdle),
            "EXCESSIVE_CONSUMPTION" => Ok(AlertKind::ExcessiveConsumption),
            "IDLE_CONSUMPTION" => Ok(AlertKind::IdleConsumption),
            other => Err(format!("unknown alert kind '{}'", other)),
        }
    }
}

/// Severidad de la alerta
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(AlertSeverity::Info),
            "WARNING" => Ok(AlertSeverity::Warning),
            "CRITICAL" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown alert severity '{}'", other)),
        }
    }
}

/// Clave de deduplicación: vehículo + tipo de condición
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub vehicle_id: String,
    pub kind: AlertKind,
}

impl DedupKey {
    pub fn new(vehicle_id: impl Into<String>, kind: AlertKind) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            kind,
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vehicle_id, self.kind)
    }
}

/// Alerta de flota
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub tenant_id: String,
    pub vehicle_id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub dedup_key: String,
}

impl Alert {
    pub fn new(
        tenant_id: impl Into<String>,
        vehicle_id: impl Into<String>,
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let vehicle_id = vehicle_id.into();
        let dedup_key = DedupKey::new(vehicle_id.clone(), kind).to_string();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            vehicle_id,
            kind,
            severity,
            message: message.into(),
            created_at,
            acknowledged_at: None,
            dedup_key,
        }
    }

    pub fn is_open(&self) -> bool {
        self.acknowledged_at.is_none()
    }

    pub fn key(&self) -> DedupKey {
        DedupKey::new(self.vehicle_id.clone(), self.kind)
    }
}
