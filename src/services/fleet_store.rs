//! Store de estado en vivo de la flota
//!
//! Mapa concurrente vehículo → estado actual, con un historial acotado de
//! lecturas por vehículo para el cálculo de eficiencia. `upsert` y
//! `mark_offline` son las únicas vías de mutación.
//!
//! Cada vehículo tiene su propio `Mutex`; el lock de escritura del mapa solo
//! se toma para dar de alta un vehículo nuevo.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::models::{ConnectivityStatus, TelemetryReading, VehicleState};

/// Errores del store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("vehicle '{vehicle_id}' belongs to tenant '{expected}', reading came from tenant '{actual}'")]
    TenantMismatch {
        vehicle_id: String,
        expected: String,
        actual: String,
    },

    #[error("state of vehicle '{vehicle_id}' is inconsistent: {detail}")]
    Inconsistent { vehicle_id: String, detail: String },
}

/// Resultado de aplicar una lectura
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// La lectura se aplicó; `previous` es `None` la primera vez que se ve el vehículo
    Applied {
        previous: Option<VehicleState>,
        current: VehicleState,
    },
    /// Lectura no más reciente que el estado; se descarta sin cambios
    Discarded { last_update: DateTime<Utc> },
}

/// Lecturas de un vehículo dentro de un rango, con la revisión del historial
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    pub readings: Vec<TelemetryReading>,
    pub revision: u64,
}

struct VehicleEntry {
    state: VehicleState,
    history: VecDeque<TelemetryReading>,
    revision: u64,
    quarantined: Option<String>,
}

impl VehicleEntry {
    fn new(reading: &TelemetryReading, capacity: usize) -> Self {
        let mut history = VecDeque::with_capacity(capacity.min(256));
        history.push_back(reading.clone());
        Self {
            state: VehicleState::from_reading(reading),
            history,
            revision: 1,
            quarantined: None,
        }
    }

    /// Verifica los invariantes de la entrada; si alguno falla la entrada queda en cuarentena
    fn check_integrity(&mut self, key: &str) -> Result<(), StoreError> {
        if self.quarantined.is_none() {
            if self.state.vehicle_id != key {
                self.quarantined = Some(format!("entry holds state of '{}'", self.state.vehicle_id));
            } else if self
                .history
                .back()
                .is_some_and(|last| last.timestamp > self.state.last_update)
            {
                self.quarantined = Some("history is ahead of the live state".to_string());
            }
        }

        match &self.quarantined {
            Some(detail) => {
                error!("🚨 Vehículo {} en cuarentena: {}", key, detail);
                Err(StoreError::Inconsistent {
                    vehicle_id: key.to_string(),
                    detail: detail.clone(),
                })
            }
            None => Ok(()),
        }
    }

    fn push_history(&mut self, reading: TelemetryReading, capacity: usize) {
        while self.history.len() >= capacity {
            self.history.pop_front();
        }
        self.history.push_back(reading);
        self.revision += 1;
    }
}

/// Store de estado en vivo. Clonarlo comparte el mismo mapa.
#[derive(Clone)]
pub struct FleetStore {
    vehicles: Arc<RwLock<HashMap<String, Arc<Mutex<VehicleEntry>>>>>,
    history_capacity: usize,
}

impl FleetStore {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            vehicles: Arc::new(RwLock::new(HashMap::new())),
            history_capacity: history_capacity.max(1),
        }
    }

    async fn entry(&self, vehicle_id: &str) -> Option<Arc<Mutex<VehicleEntry>>> {
        self.vehicles.read().await.get(vehicle_id).cloned()
    }

    /// Aplica una lectura validada. Única vía de actualización por telemetría.
    pub async fn upsert(&self, reading: &TelemetryReading) -> Result<UpsertOutcome, StoreError> {
        let entry = match self.entry(&reading.vehicle_id).await {
            Some(entry) => entry,
            None => {
                let mut vehicles = self.vehicles.write().await;
                match vehicles.get(&reading.vehicle_id) {
                    // Otro worker lo dio de alta mientras esperábamos el lock
                    Some(entry) => entry.clone(),
                    None => {
                        let entry = VehicleEntry::new(reading, self.history_capacity);
                        let current = entry.state.clone();
                        vehicles.insert(reading.vehicle_id.clone(), Arc::new(Mutex::new(entry)));
                        info!(
                            "🆕 Vehículo {} registrado (tenant {})",
                            reading.vehicle_id, reading.tenant_id
                        );
                        return Ok(UpsertOutcome::Applied {
                            previous: None,
                            current,
                        });
                    }
                }
            }
        };

        let mut entry = entry.lock().await;
        entry.check_integrity(&reading.vehicle_id)?;

        if entry.state.tenant_id != reading.tenant_id {
            return Err(StoreError::TenantMismatch {
                vehicle_id: reading.vehicle_id.clone(),
                expected: entry.state.tenant_id.clone(),
                actual: reading.tenant_id.clone(),
            });
        }

        if reading.timestamp <= entry.state.last_update {
            debug!(
                "⏪ Lectura fuera de orden para {}: {} <= {}",
                reading.vehicle_id, reading.timestamp, entry.state.last_update
            );
            return Ok(UpsertOutcome::Discarded {
                last_update: entry.state.last_update,
            });
        }

        let previous = entry.state.clone();
        entry.state.apply(reading);
        entry.push_history(reading.clone(), self.history_capacity);

        Ok(UpsertOutcome::Applied {
            previous: Some(previous),
            current: entry.state.clone(),
        })
    }

    /// Estado actual de un vehículo
    pub async fn get(&self, vehicle_id: &str) -> Option<VehicleState> {
        let entry = self.entry(vehicle_id).await?;
        let entry = entry.lock().await;
        Some(entry.state.clone())
    }

    /// Snapshot de toda la flota, ordenado por id. Bloquea un vehículo a la vez.
    pub async fn list_all(&self) -> Vec<VehicleState> {
        let entries: Vec<Arc<Mutex<VehicleEntry>>> = self.vehicles.read().await.values().cloned().collect();

        let mut states = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.lock().await;
            if entry.quarantined.is_none() {
                states.push(entry.state.clone());
            }
        }
        states.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        states
    }

    /// Marca el vehículo OFFLINE si sigue ONLINE y no recibió lecturas después de `as_of`.
    /// Devuelve el nuevo estado solo si hubo transición.
    pub async fn mark_offline(&self, vehicle_id: &str, as_of: DateTime<Utc>) -> Result<Option<VehicleState>, StoreError> {
        let Some(entry) = self.entry(vehicle_id).await else {
            return Ok(None);
        };
        let mut entry = entry.lock().await;
        entry.check_integrity(vehicle_id)?;

        if entry.state.status != ConnectivityStatus::Online || entry.state.last_update > as_of {
            return Ok(None);
        }
        entry.state.status = ConnectivityStatus::Offline;
        Ok(Some(entry.state.clone()))
    }

    /// Lecturas del vehículo con timestamp dentro de `[from, to]`
    pub async fn history(&self, vehicle_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<HistorySnapshot> {
        let entry = self.entry(vehicle_id).await?;
        let entry = entry.lock().await;
        let readings = entry
            .history
            .iter()
            .filter(|r| r.timestamp >= from && r.timestamp <= to)
            .cloned()
            .collect();
        Some(HistorySnapshot {
            readings,
            revision: entry.revision,
        })
    }

    /// Revisión actual del historial de un vehículo
    pub async fn history_revision(&self, vehicle_id: &str) -> Option<u64> {
        let entry = self.entry(vehicle_id).await?;
        let revision = entry.lock().await.revision;
        Some(revision)
    }

    /// Elimina del historial las lecturas anteriores a `cutoff`; devuelve cuántas se borraron
    pub async fn purge_history(&self, cutoff: DateTime<Utc>) -> usize {
        let entries: Vec<Arc<Mutex<VehicleEntry>>> = self.vehicles.read().await.values().cloned().collect();

        let mut removed = 0;
        for entry in entries {
            let mut entry = entry.lock().await;
            let before = entry.history.len();
            while entry.history.front().is_some_and(|r| r.timestamp < cutoff) {
                entry.history.pop_front();
            }
            let purged = before - entry.history.len();
            if purged > 0 {
                entry.revision += 1;
                removed += purged;
            }
        }
        removed
    }

    /// Número de vehículos conocidos
    pub async fn len(&self) -> usize {
        self.vehicles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    async fn corrupt(&self, vehicle_id: &str) {
        if let Some(entry) = self.entry(vehicle_id).await {
            entry.lock().await.state.vehicle_id = "someone-else".to_string();
        }
    }
}
