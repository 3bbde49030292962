//! Servicio de eficiencia de combustible
//!
//! Calcula km/L y L/100 km de un vehículo sobre una ventana de su historial,
//! junto con la eficiencia de cada tramo entre lecturas. Repostajes y caídas
//! anómalas no cuentan como consumo.
//!
//! La distancia sale de la cadena de posiciones GPS. Antes del primer fix y
//! después del último se usa el odómetro, si el dispositivo lo reporta.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{EfficiencySegment, EfficiencyWindow, FuelEventKind, TelemetryReading};
use crate::services::fleet_store::FleetStore;
use crate::services::fuel_detector::FuelEventDetector;
use crate::utils::geo::haversine_km;
use crate::utils::{bad_request_error, not_found_error, AppResult};

const CACHE_LIMIT: usize = 1024;

type CacheKey = (String, i64, i64);

#[derive(Clone)]
pub struct EfficiencyService {
    store: FleetStore,
    detector: FuelEventDetector,
    /// Resultados por (vehículo, desde, hasta) junto a la revisión del historial usada
    cache: Arc<Mutex<HashMap<CacheKey, (u64, EfficiencyWindow)>>>,
}

impl EfficiencyService {
    pub fn new(store: FleetStore, detector: FuelEventDetector) -> Self {
        Self {
            store,
            detector,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Eficiencia del vehículo en `[from, to]`
    pub async fn compute_efficiency(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<EfficiencyWindow> {
        if from > to {
            return Err(bad_request_error("'from' must not be after 'to'"));
        }

        let revision = self
            .store
            .history_revision(vehicle_id)
            .await
            .ok_or_else(|| not_found_error("Vehicle", vehicle_id))?;

        let key = (vehicle_id.to_string(), from.timestamp_millis(), to.timestamp_millis());
        if let Some((cached_revision, window)) = self.cache.lock().await.get(&key) {
            if *cached_revision == revision {
                debug!("📦 Eficiencia de {} servida desde caché", vehicle_id);
                return Ok(window.clone());
            }
        }

        let snapshot = self
            .store
            .history(vehicle_id, from, to)
            .await
            .ok_or_else(|| not_found_error("Vehicle", vehicle_id))?;
        let window = self.aggregate(vehicle_id, from, to, &snapshot.readings);

        let mut cache = self.cache.lock().await;
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(key, (snapshot.revision, window.clone()));

        Ok(window)
    }

    /// Agrega una secuencia de lecturas ordenada por tiempo
    pub fn aggregate(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        readings: &[TelemetryReading],
    ) -> EfficiencyWindow {
        let mut window = EfficiencyWindow::empty(vehicle_id, from, to);
        window.reading_count = readings.len();

        let distances = segment_distances(readings);
        window.distance_km = distances.iter().sum();

        for (index, pair) in readings.windows(2).enumerate() {
            let Some(event) = self.detector.classify_readings(&pair[0], &pair[1]) else {
                continue;
            };
            match event.kind {
                FuelEventKind::Normal if event.magnitude < 0.0 => {
                    let consumed = -event.magnitude;
                    window.fuel_consumed_liters += consumed;

                    let distance = distances[index + 1];
                    if distance > 0.0 {
                        window.timeline.push(EfficiencySegment {
                            timestamp: pair[1].timestamp,
                            distance_km: distance,
                            fuel_consumed_liters: consumed,
                            km_per_liter: distance / consumed,
                            liters_per_100km: consumed / distance * 100.0,
                        });
                    }
                }
                FuelEventKind::Normal => {}
                FuelEventKind::Refuel => window.refueled_liters += event.magnitude,
                FuelEventKind::Drop => window.anomalous_drop_liters += -event.magnitude,
            }
        }

        if window.fuel_consumed_liters > 0.0 {
            window.km_per_liter = Some(window.distance_km / window.fuel_consumed_liters);
        }
        if window.distance_km > 0.0 {
            window.liters_per_100km = Some(window.fuel_consumed_liters / window.distance_km * 100.0);
        }
        window
    }
}

/// Distancia recorrida hasta cada lectura desde la anterior (la primera es 0)
fn segment_distances(readings: &[TelemetryReading]) -> Vec<f64> {
    let mut distances = vec![0.0; readings.len()];

    // Entre lecturas con fix, saltando las que no lo tienen
    let mut last_position = None;
    for (index, reading) in readings.iter().enumerate() {
        if let Some(position) = reading.position {
            if let Some(previous) = last_position {
                distances[index] = haversine_km(&previous, &position);
            }
            last_position = Some(position);
        }
    }

    let first_fix = readings.iter().position(|r| r.position.is_some());
    let last_fix = readings.iter().rposition(|r| r.position.is_some());
    for index in 1..readings.len() {
        let covered_by_gps = match (first_fix, last_fix) {
            (Some(first), Some(last)) => index > first && index <= last,
            _ => false,
        };
        if covered_by_gps {
            continue;
        }
        // Un odómetro que retrocede (reinicio o cambio de equipo) no suma
        if let (Some(before), Some(after)) = (readings[index - 1].odometer_km, readings[index].odometer_km) {
            if after > before {
                distances[index] = after - before;
            }
        }
    }
    distances
}
