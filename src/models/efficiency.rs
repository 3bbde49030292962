use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Métricas de eficiencia de combustible sobre una ventana de tiempo.
/// Se recalcula en cada consulta, nunca se modifica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyWindow {
    pub vehicle_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub distance_km: f64,
    pub fuel_consumed_liters: f64,
    /// `None` cuando no se consumió combustible
    pub km_per_liter: Option<f64>,
    /// `None` cuando no hubo distancia recorrida
    pub liters_per_100km: Option<f64>,
    pub reading_count: usize,
    /// Litros añadidos por repostajes, excluidos del consumo
    pub refueled_liters: f64,
    /// Litros perdidos en caídas anómalas, excluidos del consumo
    pub anomalous_drop_liters: f64,
    /// Un punto por tramo entre lecturas con distancia y consumo
    pub timeline: Vec<EfficiencySegment>,
}

/// Eficiencia de un tramo entre dos lecturas consecutivas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencySegment {
    /// Instante de la lectura que cierra el tramo
    pub timestamp: DateTime<Utc>,
    pub distance_km: f64,
    pub fuel_consumed_liters: f64,
    pub km_per_liter: f64,
    pub liters_per_100km: f64,
}

impl EfficiencyWindow {
    /// Ventana vacía: sin lecturas en el rango
    pub fn empty(vehicle_id: impl Into<String>, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            from,
            to,
            distance_km: 0.0,
            fuel_consumed_liters: 0.0,
            km_per_liter: None,
            liters_per_100km: None,
            reading_count: 0,
            refueled_liters: 0.0,
            anomalous_drop_liters: 0.0,
            timeline: Vec::new(),
        }
    }
}
