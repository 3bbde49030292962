use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Clasificación de una variación de combustible
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FuelEventKind {
    Refuel,
    Drop,
    Normal,
}

impl FuelEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuelEventKind::Refuel => "REFUEL",
            FuelEventKind::Drop => "DROP",
            FuelEventKind::Normal => "NORMAL",
        }
    }
}

/// Marca sobre un consumo NORMAL que merece aviso
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumptionFlag {
    /// Consumo en marcha por encima del caudal configurado
    Excessive,
    /// Combustible quemado mientras el vehículo estaba parado con el motor encendido
    Idle,
}

/// Resultado del detector para un par de estados consecutivos
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelEvent {
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: FuelEventKind,
    /// Variación de volumen en litros (negativa si bajó)
    pub magnitude: f64,
    /// Litros por minuto, siempre positivo
    pub rate: f64,
    /// Solo en bajadas NORMAL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<ConsumptionFlag>,
}
