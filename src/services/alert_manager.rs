//! Gestor de alertas
//!
//! Convierte las señales del detector y del watchdog en alertas persistidas,
//! suprime duplicados dentro de la ventana de enfriamiento y gestiona el
//! reconocimiento desde el dashboard.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{Alert, AlertKind, AlertSeverity, DedupKey};
use crate::repositories::AlertRepository;
use crate::utils::metrics::Diagnostics;

/// Errores del gestor de alertas
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(Uuid),

    #[error("alert persistence failed: {0}")]
    Persistence(String),
}

/// Resultado de `raise`
#[derive(Debug, Clone, PartialEq)]
pub enum RaiseOutcome {
    Raised(Alert),
    /// Ya existe una alerta abierta con la misma clave dentro de la ventana
    Suppressed { existing: Uuid },
}

#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    alert_id: Uuid,
    raised_at: DateTime<Utc>,
}

/// Última alerta abierta de una clave; su lock linealiza la creación para esa clave
type DedupSlot = Arc<Mutex<Option<DedupEntry>>>;

const DEFAULT_PERSIST_TIMEOUT: StdDuration = StdDuration::from_secs(5);

#[derive(Clone)]
pub struct AlertManager {
    repository: Arc<dyn AlertRepository>,
    /// El lock del mapa solo se toma para obtener el slot de cada clave
    dedup: Arc<Mutex<HashMap<DedupKey, DedupSlot>>>,
    cooldown: Duration,
    persist_timeout: StdDuration,
    diagnostics: Diagnostics,
}

impl AlertManager {
    pub fn new(repository: Arc<dyn AlertRepository>, cooldown: Duration, diagnostics: Diagnostics) -> Self {
        Self {
            repository,
            dedup: Arc::new(Mutex::new(HashMap::new())),
            cooldown,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            diagnostics,
        }
    }

    /// Tiempo máximo de cada intento de escritura
    pub fn with_persist_timeout(mut self, persist_timeout: StdDuration) -> Self {
        self.persist_timeout = persist_timeout;
        self
    }

    async fn slot(&self, key: &DedupKey) -> DedupSlot {
        let mut index = self.dedup.lock().await;
        index.entry(key.clone()).or_default().clone()
    }

    /// Reconstruye el índice de deduplicación con las alertas abiertas persistidas
    pub async fn warm_up(&self) -> Result<usize, AlertError> {
        let open = self
            .repository
            .list_open(None)
            .await
            .map_err(|e| AlertError::Persistence(e.to_string()))?;

        let mut newest: HashMap<DedupKey, DedupEntry> = HashMap::new();
        for alert in &open {
            let entry = DedupEntry {
                alert_id: alert.id,
                raised_at: alert.created_at,
            };
            newest
                .entry(alert.key())
                .and_modify(|current| {
                    if current.raised_at < entry.raised_at {
                        *current = entry;
                    }
                })
                .or_insert(entry);
        }

        let keys = newest.len();
        for (key, entry) in newest {
            let slot = self.slot(&key).await;
            let mut current = slot.lock().await;
            if current.map_or(true, |existing| existing.raised_at < entry.raised_at) {
                *current = Some(entry);
            }
        }
        info!("🔔 Índice de alertas cargado: {} claves abiertas", keys);
        Ok(keys)
    }

    /// Levanta una alerta con la hora actual
    pub async fn raise(
        &self,
        tenant_id: &str,
        vehicle_id: &str,
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Result<RaiseOutcome, AlertError> {
        self.raise_at(tenant_id, vehicle_id, kind, severity, message, Utc::now()).await
    }

    /// Levanta una alerta con fecha de creación `now`, salvo que esté suprimida
    pub async fn raise_at(
        &self,
        tenant_id: &str,
        vehicle_id: &str,
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<RaiseOutcome, AlertError> {
        let key = DedupKey::new(vehicle_id, kind);
        let slot = self.slot(&key).await;
        let mut open = slot.lock().await;

        if let Some(entry) = open.as_ref() {
            if now - entry.raised_at < self.cooldown {
                debug!("🔕 Alerta {} suprimida, abierta desde {}", key, entry.raised_at);
                self.diagnostics.alerts_suppressed.with_label_values(&[kind.as_str()]).inc();
                return Ok(RaiseOutcome::Suppressed {
                    existing: entry.alert_id,
                });
            }
        }

        let alert = Alert::new(tenant_id, vehicle_id, kind, severity, message, now);
        self.persist(&alert).await?;

        *open = Some(DedupEntry {
            alert_id: alert.id,
            raised_at: now,
        });
        self.diagnostics.alerts_raised.with_label_values(&[kind.as_str()]).inc();
        info!(
            "🚨 Alerta {} [{}] para {}: {}",
            kind.as_str(),
            severity.as_str(),
            vehicle_id,
            alert.message
        );
        Ok(RaiseOutcome::Raised(alert))
    }

    /// Un reintento como máximo, cada intento acotado por `persist_timeout`
    async fn persist(&self, alert: &Alert) -> Result<(), AlertError> {
        match self.insert_once(alert).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("⚠️ Error guardando alerta {}, reintentando: {}", alert.id, first);
                self.insert_once(alert).await.map_err(|second| {
                    error!("❌ Alerta {} descartada tras reintento: {}", alert.id, second);
                    self.diagnostics.alert_persist_failures.inc();
                    AlertError::Persistence(second)
                })
            }
        }
    }

    async fn insert_once(&self, alert: &Alert) -> Result<(), String> {
        match timeout(self.persist_timeout, self.repository.insert(alert)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("insert timed out after {:?}", self.persist_timeout)),
        }
    }

    /// Reconoce una alerta; el registro se conserva como auditoría
    pub async fn acknowledge(&self, alert_id: Uuid) -> Result<Alert, AlertError> {
        let alert = self
            .repository
            .acknowledge(alert_id, Utc::now())
            .await
            .map_err(|e| AlertError::Persistence(e.to_string()))?
            .ok_or(AlertError::NotFound(alert_id))?;

        let slot = self.dedup.lock().await.get(&alert.key()).cloned();
        if let Some(slot) = slot {
            let mut open = slot.lock().await;
            if open.is_some_and(|entry| entry.alert_id == alert_id) {
                *open = None;
            }
        }
        info!("✅ Alerta {} reconocida", alert_id);
        Ok(alert)
    }

    /// Alertas abiertas del tenant (todas si `None`), más recientes primero
    pub async fn list_open(&self, tenant_id: Option<&str>) -> Result<Vec<Alert>, AlertError> {
        self.repository
            .list_open(tenant_id)
            .await
            .map_err(|e| AlertError::Persistence(e.to_string()))
    }

    /// Últimas alertas, incluidas las reconocidas
    pub async fn list_recent(&self, tenant_id: Option<&str>, limit: usize) -> Result<Vec<Alert>, AlertError> {
        self.repository
            .list_recent(tenant_id, limit)
            .await
            .map_err(|e| AlertError::Persistence(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{InMemoryAlertRepository, RepositoryError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Repositorio que falla las primeras `failures` inserciones
    struct FlakyRepository {
        inner: InMemoryAlertRepository,
        failures: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl FlakyRepository {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryAlertRepository::new(),
                failures: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AlertRepository for FlakyRepository {
        async fn insert(&self, alert: &Alert) -> Result<(), RepositoryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RepositoryError::Unavailable("connection reset".to_string()));
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

    /// Repositorio cuyas inserciones para `slow_vehicle` tardan `delay`
    struct SlowRepository {
        inner: InMemoryAlertRepository,
        slow_vehicle: &'static str,
        delay: StdDuration,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AlertRepository for SlowRepository {
        async fn insert(&self, alert: &Alert) -> Result<(), RepositoryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if alert.vehicle_id == self.slow_vehicle {
                tokio::time::sleep(self.delay).await;
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

    fn slow_repository(delay: StdDuration) -> Arc<SlowRepository> {
        Arc::new(SlowRepository {
            inner: InMemoryAlertRepository::new(),
            slow_vehicle: "bus-slow",
            delay,
            attempts: AtomicUsize::new(0),
        })
    }

    fn manager_with(repository: Arc<dyn AlertRepository>) -> AlertManager {
        AlertManager::new(repository, Duration::minutes(30), Diagnostics::new().unwrap())
    }

    fn manager() -> AlertManager {
        manager_with(Arc::new(InMemoryAlertRepository::new()))
    }

    async fn raise_drop(manager: &AlertManager, now: DateTime<Utc>) -> RaiseOutcome {
        manager
            .raise_at("school-1", "bus-7", AlertKind::FuelDrop, AlertSeverity::Critical, "drop", now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_within_cooldown_is_suppressed() {
        let manager = manager();
        let now = Utc::now();

        let RaiseOutcome::Raised(first) = raise_drop(&manager, now).await else {
            panic!("first alert must be raised");
        };
        let second = raise_drop(&manager, now + Duration::minutes(10)).await;
        assert_eq!(second, RaiseOutcome::Suppressed { existing: first.id });

        assert_eq!(manager.list_open(None).await.unwrap().len(), 1);
        assert_eq!(manager.diagnostics.alerts_suppressed.with_label_values(&["FUEL_DROP"]).get(), 1);
    }

    #[tokio::test]
    async fn test_other_kind_or_vehicle_is_not_suppressed() {
        let manager = manager();
        let now = Utc::now();
        raise_drop(&manager, now).await;

        let other_kind = manager
            .raise_at("school-1", "bus-7", AlertKind::Offline, AlertSeverity::Warning, "offline", now)
            .await
            .unwrap();
        assert!(matches!(other_kind, RaiseOutcome::Raised(_)));

        let other_vehicle = manager
            .raise_at("school-1", "bus-8", AlertKind::FuelDrop, AlertSeverity::Critical, "drop", now)
            .await
            .unwrap();
        assert!(matches!(other_vehicle, RaiseOutcome::Raised(_)));
    }

    #[tokio::test]
    async fn test_raise_again_after_cooldown() {
        let manager = manager();
        let now = Utc::now();
        raise_drop(&manager, now).await;

        let later = raise_drop(&manager, now + Duration::minutes(31)).await;
        assert!(matches!(later, RaiseOutcome::Raised(_)));
        assert_eq!(manager.list_open(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_acknowledge_frees_key_and_hides_from_open() {
        let manager = manager();
        let now = Utc::now();
        let RaiseOutcome::Raised(alert) = raise_drop(&manager, now).await else {
            panic!("expected raised");
        };

        let acked = manager.acknowledge(alert.id).await.unwrap();
        assert!(acked.acknowledged_at.is_some());
        assert!(manager.list_open(Some("school-1")).await.unwrap().is_empty());
        assert_eq!(manager.list_recent(Some("school-1"), 50).await.unwrap().len(), 1);

        let again = raise_drop(&manager, now + Duration::minutes(1)).await;
        assert!(matches!(again, RaiseOutcome::Raised(_)));
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_is_not_found() {
        let manager = manager();
        let missing = Uuid::new_v4();
        let err = manager.acknowledge(missing).await.unwrap_err();
        assert!(matches!(err, AlertError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_single_retry_on_persistence_failure() {
        let repository = Arc::new(FlakyRepository::new(1));
        let manager = manager_with(repository.clone());
        let outcome = raise_drop(&manager, Utc::now()).await;
        assert!(matches!(outcome, RaiseOutcome::Raised(_)));
        assert_eq!(repository.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_retry() {
        let repository = Arc::new(FlakyRepository::new(5));
        let manager = manager_with(repository.clone());
        let err = manager
            .raise("school-1", "bus-7", AlertKind::FuelDrop, AlertSeverity::Critical, "drop")
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Persistence(_)));
        assert_eq!(repository.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(manager.diagnostics.alert_persist_failures.get(), 1);

        // La clave no quedó ocupada por una alerta que nunca se guardó
        repository.failures.store(0, Ordering::SeqCst);
        let retry = raise_drop(&manager, Utc::now()).await;
        assert!(matches!(retry, RaiseOutcome::Raised(_)));
    }

    #[tokio::test]
    async fn test_concurrent_raises_create_one_alert() {
        let manager = manager();
        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { raise_drop(&manager, now).await }));
        }
        let mut raised = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), RaiseOutcome::Raised(_)) {
                raised += 1;
            }
        }
        assert_eq!(raised, 1);
    }

    #[tokio::test]
    async fn test_slow_insert_does_not_block_other_keys() {
        let manager = manager_with(slow_repository(StdDuration::from_millis(500)));
        let now = Utc::now();

        let slow = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .raise_at("school-1", "bus-slow", AlertKind::Offline, AlertSeverity::Warning, "offline", now)
                    .await
            })
        };
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let fast = timeout(StdDuration::from_millis(200), raise_drop(&manager, now))
            .await
            .expect("raise on another key must not wait for the slow insert");
        assert!(matches!(fast, RaiseOutcome::Raised(_)));
        assert!(matches!(slow.await.unwrap().unwrap(), RaiseOutcome::Raised(_)));
    }

    #[tokio::test]
    async fn test_hung_insert_times_out() {
        let repository = slow_repository(StdDuration::from_secs(3600));
        let manager = manager_with(repository.clone()).with_persist_timeout(StdDuration::from_millis(30));

        let err = manager
            .raise("school-1", "bus-slow", AlertKind::Offline, AlertSeverity::Warning, "offline")
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Persistence(ref msg) if msg.contains("timed out")));
        assert_eq!(repository.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(manager.diagnostics.alert_persist_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_warm_up_restores_dedup_index() {
        let repository: Arc<dyn AlertRepository> = Arc::new(InMemoryAlertRepository::new());
        let now = Utc::now();
        raise_drop(&manager_with(repository.clone()), now).await;

        let restarted = manager_with(repository);
        assert_eq!(restarted.warm_up().await.unwrap(), 1);
        let outcome = raise_drop(&restarted, now + Duration::minutes(5)).await;
        assert!(matches!(outcome, RaiseOutcome::Suppressed { .. }));
    }
}
