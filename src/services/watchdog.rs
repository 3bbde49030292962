//! Watchdog de conectividad
//!
//! Tarea periódica que marca OFFLINE a los vehículos sin telemetría reciente,
//! levanta la alerta correspondiente y purga el historial antiguo. Cada
//! vehículo se procesa por separado: si su alerta no se pudo guardar queda
//! pendiente y se reintenta en el siguiente tick.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::FleetConfig;
use crate::models::{AlertKind, AlertSeverity, FleetEvent, VehicleState};
use crate::services::alert_manager::{AlertManager, RaiseOutcome};
use crate::services::broadcaster::Broadcaster;
use crate::services::fleet_store::FleetStore;
use crate::utils::metrics::Diagnostics;

/// Resumen de una pasada del watchdog
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WatchdogReport {
    pub scanned: usize,
    pub marked_offline: Vec<String>,
    pub alerts_raised: usize,
    /// Alertas OFFLINE que no se pudieron guardar; quedan pendientes
    pub alert_failures: usize,
    pub inconsistent: usize,
    pub history_purged: usize,
}

#[derive(Clone)]
pub struct OfflineWatchdog {
    store: FleetStore,
    alerts: AlertManager,
    broadcaster: Broadcaster,
    diagnostics: Diagnostics,
    offline_timeout: Duration,
    interval: StdDuration,
    history_retention: Duration,
    /// Vehículos ya OFFLINE cuya alerta todavía no quedó registrada
    pending_alerts: Arc<Mutex<HashSet<String>>>,
}

impl OfflineWatchdog {
    pub fn new(
        store: FleetStore,
        alerts: AlertManager,
        broadcaster: Broadcaster,
        diagnostics: Diagnostics,
        config: &FleetConfig,
    ) -> Self {
        Self {
            store,
            alerts,
            broadcaster,
            diagnostics,
            offline_timeout: config.offline_timeout,
            interval: config.watchdog_interval,
            history_retention: config.history_retention,
            pending_alerts: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Una pasada completa con `now` como hora de referencia.
    /// Los fallos de un vehículo se cuentan en el informe y no detienen la pasada.
    pub async fn run_once(&self, now: DateTime<Utc>) -> WatchdogReport {
        let cutoff = now - self.offline_timeout;
        let snapshot = self.store.list_all().await;
        let mut report = WatchdogReport {
            scanned: snapshot.len(),
            ..WatchdogReport::default()
        };

        let mut online = 0i64;
        for state in snapshot {
            if !state.is_online() {
                if self.is_pending(&state.vehicle_id) {
                    self.raise_offline(&state, now, &mut report).await;
                }
                continue;
            }
            if now - state.last_update <= self.offline_timeout {
                online += 1;
                self.clear_pending(&state.vehicle_id);
                continue;
            }

            // Una lectura pudo llegar después del snapshot; mark_offline lo comprueba
            let offline = match self.store.mark_offline(&state.vehicle_id, cutoff).await {
                Ok(Some(offline)) => offline,
                Ok(None) => {
                    online += 1;
                    self.clear_pending(&state.vehicle_id);
                    continue;
                }
                Err(e) => {
                    warn!("⚠️ Watchdog omite {}: {}", state.vehicle_id, e);
                    report.inconsistent += 1;
                    continue;
                }
            };

            info!(
                "📵 Vehículo {} OFFLINE (sin datos desde {})",
                offline.vehicle_id, offline.last_update
            );
            report.marked_offline.push(offline.vehicle_id.clone());
            self.broadcaster.publish(FleetEvent::StateUpdate(offline.clone()));

            self.set_pending(&offline.vehicle_id);
            self.raise_offline(&offline, now, &mut report).await;
        }

        report.history_purged = self.store.purge_history(now - self.history_retention).await;
        self.diagnostics.vehicles_online.set(online);

        report
    }

    async fn raise_offline(&self, offline: &VehicleState, now: DateTime<Utc>, report: &mut WatchdogReport) {
        let silent_minutes = (now - offline.last_update).num_minutes();
        let outcome = self
            .alerts
            .raise_at(
                &offline.tenant_id,
                &offline.vehicle_id,
                AlertKind::Offline,
                AlertSeverity::Warning,
                format!(
                    "Vehicle {} has not reported telemetry for {} minutes",
                    offline.vehicle_id, silent_minutes
                ),
                now,
            )
            .await;

        match outcome {
            Ok(outcome) => {
                self.clear_pending(&offline.vehicle_id);
                if let RaiseOutcome::Raised(alert) = outcome {
                    report.alerts_raised += 1;
                    self.broadcaster.publish(FleetEvent::AlertRaised(alert));
                }
            }
            Err(e) => {
                error!(
                    "❌ Alerta OFFLINE de {} pendiente, se reintenta en el próximo tick: {}",
                    offline.vehicle_id, e
                );
                report.alert_failures += 1;
            }
        }
    }

    fn is_pending(&self, vehicle_id: &str) -> bool {
        self.pending_alerts
            .lock()
            .map(|pending| pending.contains(vehicle_id))
            .unwrap_or(false)
    }

    fn set_pending(&self, vehicle_id: &str) {
        if let Ok(mut pending) = self.pending_alerts.lock() {
            pending.insert(vehicle_id.to_string());
        }
    }

    fn clear_pending(&self, vehicle_id: &str) {
        if let Ok(mut pending) = self.pending_alerts.lock() {
            pending.remove(vehicle_id);
        }
    }

    /// Bucle del watchdog hasta la señal de apagado
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("⏱️ Watchdog iniciado (intervalo {:?})", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => break,
            }
        }
        info!("🛑 Watchdog detenido");
    }

    async fn tick(&self) {
        let outcome = match tokio::time::timeout(self.interval, self.run_once(Utc::now())).await {
            Ok(report) => {
                debug!(
                    "🔍 Watchdog: {} vehículos, {} offline, {} lecturas purgadas",
                    report.scanned,
                    report.marked_offline.len(),
                    report.history_purged
                );
                if report.alert_failures > 0 {
                    "error"
                } else {
                    "ok"
                }
            }
            Err(_) => {
                warn!("⏰ Pasada del watchdog abandonada: superó {:?}", self.interval);
                "timeout"
            }
        };
        self.diagnostics.watchdog_runs.with_label_values(&[outcome]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Alert, ConnectivityStatus, TelemetryReading};
    use crate::repositories::{AlertRepository, InMemoryAlertRepository, RepositoryError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    /// Repositorio que se puede tirar y levantar, con inserciones opcionalmente lentas
    #[derive(Default)]
    struct ToggleRepository {
        inner: InMemoryAlertRepository,
        down: AtomicBool,
        insert_delay: Option<StdDuration>,
    }

    #[async_trait]
    impl AlertRepository for ToggleRepository {
        async fn insert(&self, alert: &Alert) -> Result<(), RepositoryError> {
            if let Some(delay) = self.insert_delay {
                tokio::time::sleep(delay).await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(RepositoryError::Unavailable("connection refused".to_string()));
            }
            self.inner.insert(alert).await
        }

        async fn acknowledge(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, RepositoryError> {
            self.inner.acknowledge(id, at).await
        }

        async fn list_open(&self, tenant_id: Option<&str>) -> Result<Vec<Alert>, RepositoryError> {
            self.inner.list_open(tenant_id).await
        }

        async fn list_recent(&self, tenant_id: Option<&str>, limit: usize) -> Result<Vec<Alert>, RepositoryError> {
            self.inner.list_recent(tenant_id, limit).await
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn reading(vehicle: &str, at: DateTime<Utc>) -> TelemetryReading {
        TelemetryReading {
            tenant_id: "school-1".to_string(),
            vehicle_id: vehicle.to_string(),
            timestamp: at,
            position: None,
            speed_kmh: 20.0,
            fuel_level_liters: 40.0,
            engine_on: true,
            heading: None,
            odometer_km: None,
        }
    }

    fn watchdog() -> (OfflineWatchdog, FleetStore, AlertManager, Diagnostics) {
        watchdog_with(Arc::new(InMemoryAlertRepository::new()), FleetConfig::default())
    }

    fn watchdog_with(
        repository: Arc<dyn AlertRepository>,
        config: FleetConfig,
    ) -> (OfflineWatchdog, FleetStore, AlertManager, Diagnostics) {
        let diagnostics = Diagnostics::new().unwrap();
        let store = FleetStore::new(100);
        let alerts = AlertManager::new(repository, config.alert_cooldown, diagnostics.clone());
        let broadcaster = Broadcaster::new(16, diagnostics.clone());
        let watchdog = OfflineWatchdog::new(store.clone(), alerts.clone(), broadcaster, diagnostics.clone(), &config);
        (watchdog, store, alerts, diagnostics)
    }

    #[tokio::test]
    async fn test_silent_vehicle_goes_offline_once() {
        let (watchdog, store, alerts, diagnostics) = watchdog();
        store.upsert(&reading("bus-1", t0())).await.unwrap();
        store.upsert(&reading("bus-2", t0() + Duration::minutes(5))).await.unwrap();

        let report = watchdog.run_once(t0() + Duration::minutes(6)).await;
        assert_eq!(report.marked_offline, vec!["bus-1".to_string()]);
        assert_eq!(report.alerts_raised, 1);
        assert_eq!(store.get("bus-1").await.unwrap().status, ConnectivityStatus::Offline);
        assert!(store.get("bus-2").await.unwrap().is_online());
        assert_eq!(diagnostics.vehicles_online.get(), 1);

        let again = watchdog.run_once(t0() + Duration::minutes(7)).await;
        assert!(again.marked_offline.is_empty());

        let open = alerts.list_open(Some("school-1")).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, AlertKind::Offline);
        assert_eq!(open[0].severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn test_exactly_at_timeout_stays_online() {
        let (watchdog, store, _, _) = watchdog();
        store.upsert(&reading("bus-1", t0())).await.unwrap();

        let report = watchdog.run_once(t0() + Duration::minutes(5)).await;
        assert!(report.marked_offline.is_empty());
    }

    #[tokio::test]
    async fn test_back_online_then_offline_again_is_deduplicated() {
        let (watchdog, store, alerts, _) = watchdog();
        store.upsert(&reading("bus-1", t0())).await.unwrap();
        watchdog.run_once(t0() + Duration::minutes(6)).await;

        store.upsert(&reading("bus-1", t0() + Duration::minutes(8))).await.unwrap();
        assert!(store.get("bus-1").await.unwrap().is_online());

        let report = watchdog.run_once(t0() + Duration::minutes(14)).await;
        assert_eq!(report.marked_offline.len(), 1);
        assert_eq!(report.alerts_raised, 0);
        assert_eq!(alerts.list_open(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purges_old_history() {
        let (watchdog, store, _, _) = watchdog();
        store.upsert(&reading("bus-1", t0())).await.unwrap();
        store.upsert(&reading("bus-1", t0() + Duration::days(100))).await.unwrap();

        let report = watchdog.run_once(t0() + Duration::days(100)).await;
        assert_eq!(report.history_purged, 1);
    }

    #[tokio::test]
    async fn test_failed_offline_alerts_are_retried_next_tick() {
        let repository = Arc::new(ToggleRepository::default());
        let (watchdog, store, alerts, diagnostics) = watchdog_with(repository.clone(), FleetConfig::default());
        store.upsert(&reading("bus-1", t0() - Duration::days(100))).await.unwrap();
        store.upsert(&reading("bus-1", t0())).await.unwrap();
        store.upsert(&reading("bus-2", t0())).await.unwrap();
        store.upsert(&reading("bus-3", t0() + Duration::minutes(9))).await.unwrap();

        repository.down.store(true, Ordering::SeqCst);
        let first = watchdog.run_once(t0() + Duration::minutes(10)).await;
        assert_eq!(first.marked_offline, vec!["bus-1".to_string(), "bus-2".to_string()]);
        assert_eq!(first.alert_failures, 2);
        assert_eq!(first.alerts_raised, 0);
        // El resto de la pasada se completa igual
        assert_eq!(first.history_purged, 1);
        assert_eq!(diagnostics.vehicles_online.get(), 1);
        assert_eq!(store.get("bus-1").await.unwrap().status, ConnectivityStatus::Offline);
        assert_eq!(store.get("bus-2").await.unwrap().status, ConnectivityStatus::Offline);
        assert!(alerts.list_open(None).await.unwrap().is_empty());

        repository.down.store(false, Ordering::SeqCst);
        let second = watchdog.run_once(t0() + Duration::minutes(11)).await;
        assert!(second.marked_offline.is_empty());
        assert_eq!(second.alert_failures, 0);
        assert_eq!(second.alerts_raised, 2);

        let mut open: Vec<(String, AlertKind)> = alerts
            .list_open(Some("school-1"))
            .await
            .unwrap()
            .into_iter()
            .map(|a| (a.vehicle_id, a.kind))
            .collect();
        open.sort();
        assert_eq!(
            open,
            vec![
                ("bus-1".to_string(), AlertKind::Offline),
                ("bus-2".to_string(), AlertKind::Offline)
            ]
        );

        let third = watchdog.run_once(t0() + Duration::minutes(12)).await;
        assert_eq!(third.alerts_raised, 0);
        assert_eq!(alerts.list_open(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_alert_is_dropped_when_vehicle_returns() {
        let repository = Arc::new(ToggleRepository::default());
        let (watchdog, store, alerts, _) = watchdog_with(repository.clone(), FleetConfig::default());
        store.upsert(&reading("bus-1", t0())).await.unwrap();

        repository.down.store(true, Ordering::SeqCst);
        assert_eq!(watchdog.run_once(t0() + Duration::minutes(6)).await.alert_failures, 1);

        repository.down.store(false, Ordering::SeqCst);
        store.upsert(&reading("bus-1", t0() + Duration::minutes(7))).await.unwrap();
        let report = watchdog.run_once(t0() + Duration::minutes(8)).await;
        assert_eq!(report.alerts_raised, 0);
        assert!(alerts.list_open(None).await.unwrap().is_empty());
        assert!(!watchdog.is_pending("bus-1"));
    }

    #[tokio::test]
    async fn test_slow_pass_is_abandoned_as_timeout() {
        let repository = Arc::new(ToggleRepository {
            insert_delay: Some(StdDuration::from_millis(300)),
            ..ToggleRepository::default()
        });
        let config = FleetConfig {
            watchdog_interval: StdDuration::from_millis(20),
            ..FleetConfig::default()
        };
        let (watchdog, store, _, diagnostics) = watchdog_with(repository, config);
        store.upsert(&reading("bus-1", Utc::now() - Duration::minutes(10))).await.unwrap();

        watchdog.tick().await;
        assert_eq!(diagnostics.watchdog_runs.with_label_values(&["timeout"]).get(), 1);
        assert_eq!(diagnostics.watchdog_runs.with_label_values(&["ok"]).get(), 0);
        // La alerta abandonada queda pendiente para el siguiente tick
        assert!(watchdog.is_pending("bus-1"));
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let (watchdog, _, _, diagnostics) = watchdog();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(watchdog.run(rx));

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(diagnostics.watchdog_runs.with_label_values(&["ok"]).get(), 1);
    }
}
