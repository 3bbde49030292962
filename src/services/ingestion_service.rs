//! Pipeline de ingesta
//!
//! Aplica cada lectura decodificada: store → detector y monitor de
//! condiciones → alertas → fan-out.
//! El `IngestionDispatcher` reparte las lecturas entre workers por hash del
//! vehículo, así las lecturas de un mismo vehículo se procesan en orden y
//! vehículos distintos avanzan en paralelo.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chrono::{DateTime, Utc};

use crate::models::{AlertKind, AlertSeverity, FleetEvent, TelemetryReading, VehicleState};
use crate::services::alert_manager::{AlertManager, RaiseOutcome};
use crate::services::broadcaster::Broadcaster;
use crate::services::condition_monitor::ConditionMonitor;
use crate::services::fleet_store::{FleetStore, StoreError, UpsertOutcome};
use crate::services::fuel_detector::{alert_for, FuelEventDetector};
use crate::utils::metrics::Diagnostics;

/// Resultado de procesar una lectura
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Applied(VehicleState),
    Discarded,
}

#[derive(Clone)]
pub struct IngestionService {
    store: FleetStore,
    detector: FuelEventDetector,
    monitor: ConditionMonitor,
    alerts: AlertManager,
    broadcaster: Broadcaster,
    diagnostics: Diagnostics,
}

impl IngestionService {
    pub fn new(
        store: FleetStore,
        detector: FuelEventDetector,
        monitor: ConditionMonitor,
        alerts: AlertManager,
        broadcaster: Broadcaster,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            store,
            detector,
            monitor,
            alerts,
            broadcaster,
            diagnostics,
        }
    }

    /// Procesa una lectura ya validada
    pub async fn process_reading(&self, reading: TelemetryReading) -> Result<IngestOutcome, StoreError> {
        let (previous, current) = match self.store.upsert(&reading).await? {
            UpsertOutcome::Applied { previous, current } => (previous, current),
            UpsertOutcome::Discarded { .. } => {
                self.diagnostics.readings_out_of_order.inc();
                return Ok(IngestOutcome::Discarded);
            }
        };

        if let Some(previous) = previous.as_ref() {
            if let Some(event) = self.detector.classify(previous, &current) {
                self.diagnostics.fuel_events.with_label_values(&[event.kind.as_str()]).inc();

                if let Some((kind, severity, message)) = alert_for(&event) {
                    self.raise_and_publish(&current, kind, severity, message, event.timestamp)
                        .await;
                }
            }
        }

        for (kind, severity, message) in self.monitor.evaluate(previous.as_ref(), &current) {
            self.raise_and_publish(&current, kind, severity, message, current.last_update)
                .await;
        }

        self.broadcaster.publish(FleetEvent::StateUpdate(current.clone()));
        Ok(IngestOutcome::Applied(current))
    }

    async fn raise_and_publish(
        &self,
        current: &VehicleState,
        kind: AlertKind,
        severity: AlertSeverity,
        message: String,
        at: DateTime<Utc>,
    ) {
        match self
            .alerts
            .raise_at(&current.tenant_id, &current.vehicle_id, kind, severity, message, at)
            .await
        {
            Ok(RaiseOutcome::Raised(alert)) => {
                self.broadcaster.publish(FleetEvent::AlertRaised(alert));
            }
            Ok(RaiseOutcome::Suppressed { .. }) => {}
            // La alerta se pierde pero el estado ya se aplicó
            Err(e) => error!("❌ No se pudo registrar alerta {} para {}: {}", kind, current.vehicle_id, e),
        }
    }
}

/// Errores al encolar una lectura
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("ingestion queue is full")]
    QueueFull,

    #[error("ingestion workers are stopped")]
    Closed,
}

/// Reparte lecturas entre workers secuenciales por vehículo
#[derive(Clone)]
pub struct IngestionDispatcher {
    queues: Vec<mpsc::Sender<TelemetryReading>>,
}

impl IngestionDispatcher {
    /// Lanza `workers` tareas; terminan al vaciar su cola tras la señal de apagado
    pub fn spawn(
        service: IngestionService,
        workers: usize,
        queue_capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let workers = workers.max(1);
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            queues.push(tx);
            handles.push(tokio::spawn(run_worker(worker_id, service.clone(), rx, shutdown.clone())));
        }
        info!("⚙️ {} workers de ingesta iniciados", workers);

        (Self { queues }, handles)
    }

    fn queue_for(&self, vehicle_id: &str) -> &mpsc::Sender<TelemetryReading> {
        let mut hasher = DefaultHasher::new();
        vehicle_id.hash(&mut hasher);
        let index = (hasher.finish() % self.queues.len() as u64) as usize;
        &self.queues[index]
    }

    /// Encola esperando espacio (ingesta desde el broker)
    pub async fn dispatch(&self, reading: TelemetryReading) -> Result<(), DispatchError> {
        self.queue_for(&reading.vehicle_id)
            .send(reading)
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Encola sin esperar (ingesta HTTP); falla si la cola está llena
    pub fn try_dispatch(&self, reading: TelemetryReading) -> Result<(), DispatchError> {
        self.queue_for(&reading.vehicle_id)
            .try_send(reading)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })
    }
}

async fn run_worker(
    worker_id: usize,
    service: IngestionService,
    mut rx: mpsc::Receiver<TelemetryReading>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            reading = rx.recv() => {
                let Some(reading) = reading else { break };
                process(&service, reading).await;
            }
            _ = shutdown.changed() => {
                // Vaciar lo ya encolado antes de salir
                rx.close();
                while let Some(reading) = rx.recv().await {
                    process(&service, reading).await;
                }
                break;
            }
        }
    }
    debug!("🛑 Worker de ingesta {} detenido", worker_id);
}

async fn process(service: &IngestionService, reading: TelemetryReading) {
    let vehicle_id = reading.vehicle_id.clone();
    if let Err(e) = service.process_reading(reading).await {
        warn!("⚠️ Lectura de {} rechazada por el store: {}", vehicle_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::models::{AlertKind, Position};
    use crate::repositories::InMemoryAlertRepository;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn reading(vehicle: &str, offset_minutes: i64, fuel: f64) -> TelemetryReading {
        TelemetryReading {
            tenant_id: "school-1".to_string(),
            vehicle_id: vehicle.to_string(),
            timestamp: t0() + Duration::minutes(offset_minutes),
            position: Some(Position::new(-33.45, -70.66)),
            speed_kmh: 0.0,
            fuel_level_liters: fuel,
            engine_on: false,
            heading: None,
            odometer_km: None,
        }
    }

    fn service() -> (IngestionService, Broadcaster, Diagnostics) {
        let config = FleetConfig::default();
        let diagnostics = Diagnostics::new().unwrap();
        let alerts = AlertManager::new(
            Arc::new(InMemoryAlertRepository::new()),
            config.alert_cooldown,
            diagnostics.clone(),
        );
        let broadcaster = Broadcaster::new(64, diagnostics.clone());
        let service = IngestionService::new(
            FleetStore::new(100),
            FuelEventDetector::from_config(&config),
            ConditionMonitor::from_config(&config),
            alerts,
            broadcaster.clone(),
            diagnostics.clone(),
        );
        (service, broadcaster, diagnostics)
    }

    #[tokio::test]
    async fn test_refuel_raises_alert_and_publishes() {
        let (service, broadcaster, _) = service();
        let mut sub = broadcaster.subscribe("test");

        service.process_reading(reading("bus-7", 0, 50.0)).await.unwrap();
        service.process_reading(reading("bus-7", 5, 56.0)).await.unwrap();

        assert!(matches!(sub.try_recv(), Some(FleetEvent::StateUpdate(_))));
        match sub.try_recv() {
            Some(FleetEvent::AlertRaised(alert)) => assert_eq!(alert.kind, AlertKind::FuelRefuelAnomaly),
            other => panic!("expected alert, got {:?}", other),
        }
        assert!(matches!(sub.try_recv(), Some(FleetEvent::StateUpdate(_))));
    }

    #[tokio::test]
    async fn test_condition_alerts_go_through_dedup() {
        let (service, broadcaster, diagnostics) = service();
        let mut sub = broadcaster.subscribe("test");

        let mut fast = reading("bus-7", 0, 50.0);
        fast.speed_kmh = 95.0;
        fast.engine_on = true;
        service.process_reading(fast.clone()).await.unwrap();

        // Baja de la velocidad y vuelve a pasarla dentro del enfriamiento
        let mut slow = fast.clone();
        slow.timestamp = t0() + Duration::minutes(1);
        slow.speed_kmh = 50.0;
        service.process_reading(slow).await.unwrap();
        fast.timestamp = t0() + Duration::minutes(2);
        service.process_reading(fast).await.unwrap();

        match sub.try_recv() {
            Some(FleetEvent::AlertRaised(alert)) => assert_eq!(alert.kind, AlertKind::Speeding),
            other => panic!("expected speeding alert, got {:?}", other),
        }
        let mut raised = 1;
        while let Some(event) = sub.try_recv() {
            if matches!(event, FleetEvent::AlertRaised(_)) {
                raised += 1;
            }
        }
        assert_eq!(raised, 1);
        assert_eq!(
            diagnostics.alerts_suppressed.with_label_values(&["SPEEDING"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_replayed_reading_is_discarded_and_counted() {
        let (service, broadcaster, diagnostics) = service();
        service.process_reading(reading("bus-7", 1, 50.0)).await.unwrap();
        let mut sub = broadcaster.subscribe("test");

        let outcome = service.process_reading(reading("bus-7", 1, 20.0)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Discarded);
        assert_eq!(diagnostics.readings_out_of_order.get(), 1);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dispatcher_processes_in_order_per_vehicle() {
        let (service, _, _) = service();
        let store = service.store.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, handles) = IngestionDispatcher::spawn(service, 3, 64, shutdown_rx);

        for vehicle in ["bus-1", "bus-2", "bus-3", "bus-4"] {
            for minute in 0..20 {
                dispatcher.dispatch(reading(vehicle, minute, 50.0)).await.unwrap();
            }
        }

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        for vehicle in ["bus-1", "bus-2", "bus-3", "bus-4"] {
            let state = store.get(vehicle).await.unwrap();
            assert_eq!(state.last_update, t0() + Duration::minutes(19));
            let history = store
                .history(vehicle, t0(), t0() + Duration::hours(1))
                .await
                .unwrap();
            assert_eq!(history.readings.len(), 20);
        }
    }
}
