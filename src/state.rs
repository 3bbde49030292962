//! Shared application state
//!
//! Este módulo define el estado compartido de la aplicación que se pasa
//! a través del router de Axum: los servicios del motor de telemetría ya
//! cableados entre sí.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{EnvironmentConfig, FleetConfig};
use crate::repositories::AlertRepository;
use crate::services::{
    AlertManager, Broadcaster, ConditionMonitor, EfficiencyService, FleetStore, FuelEventDetector, FuelReportService,
    IngestionDispatcher, IngestionService, OfflineWatchdog, TelemetryDecoder,
};
use crate::utils::metrics::Diagnostics;

#[derive(Clone)]
pub struct AppState {
    pub config: EnvironmentConfig,
    pub fleet: Arc<FleetConfig>,
    pub store: FleetStore,
    pub alerts: AlertManager,
    pub efficiency: EfficiencyService,
    pub reports: FuelReportService,
    pub broadcaster: Broadcaster,
    pub decoder: TelemetryDecoder,
    pub dispatcher: IngestionDispatcher,
    pub diagnostics: Diagnostics,
    /// Estado de la conexión al broker; `None` si la ingesta pub/sub está desactivada
    pub broker_connected: Option<Arc<AtomicBool>>,
    /// Señal de apagado; cierra los streams del canal en vivo
    pub shutdown: watch::Receiver<bool>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Arma el motor y lanza los workers de ingesta
    pub fn new(
        config: EnvironmentConfig,
        fleet: FleetConfig,
        repository: Arc<dyn AlertRepository>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, Vec<JoinHandle<()>>), prometheus::Error> {
        let diagnostics = Diagnostics::new()?;
        let store = FleetStore::new(fleet.history_capacity);
        let detector = FuelEventDetector::from_config(&fleet);
        let alerts = AlertManager::new(repository, fleet.alert_cooldown, diagnostics.clone())
            .with_persist_timeout(fleet.alert_persist_timeout);
        let broadcaster = Broadcaster::new(fleet.observer_queue_capacity, diagnostics.clone());

        let ingestion = IngestionService::new(
            store.clone(),
            detector.clone(),
            ConditionMonitor::from_config(&fleet),
            alerts.clone(),
            broadcaster.clone(),
            diagnostics.clone(),
        );
        let (dispatcher, workers) =
            IngestionDispatcher::spawn(ingestion, fleet.ingest_workers, fleet.ingest_queue_capacity, shutdown.clone());

        let efficiency = EfficiencyService::new(store.clone(), detector);
        let state = Self {
            config,
            decoder: TelemetryDecoder::new(&fleet),
            reports: FuelReportService::new(store.clone(), efficiency.clone()),
            efficiency,
            fleet: Arc::new(fleet),
            store,
            alerts,
            broadcaster,
            dispatcher,
            diagnostics,
            broker_connected: None,
            shutdown,
            started_at: Utc::now(),
        };
        Ok((state, workers))
    }

    /// Watchdog de conectividad sobre los mismos servicios
    pub fn watchdog(&self) -> OfflineWatchdog {
        OfflineWatchdog::new(
            self.store.clone(),
            self.alerts.clone(),
            self.broadcaster.clone(),
            self.diagnostics.clone(),
            &self.fleet,
        )
    }

    /// "disabled", "connected" o "disconnected"
    pub fn broker_status(&self) -> &'static str {
        match &self.broker_connected {
            None => "disabled",
            Some(flag) if flag.load(Ordering::Relaxed) => "connected",
            Some(_) => "disconnected",
        }
    }
}
