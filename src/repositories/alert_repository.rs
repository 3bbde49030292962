//! Repositorio de alertas
//!
//! Persistencia de las alertas de flota. La implementación PostgreSQL se usa
//! cuando hay `DATABASE_URL`; la de memoria sirve para desarrollo y tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Alert, AlertKind, AlertSeverity};

/// Errores de persistencia
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored alert {id} is unreadable: {reason}")]
    Corrupt { id: Uuid, reason: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn insert(&self, alert: &Alert) -> Result<(), RepositoryError>;

    /// Marca la alerta como reconocida; si ya lo estaba conserva la fecha original
    async fn acknowledge(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, RepositoryError>;

    /// Alertas sin reconocer, más recientes primero
    async fn list_open(&self, tenant_id: Option<&str>) -> Result<Vec<Alert>, RepositoryError>;

    /// Últimas alertas (reconocidas o no), más recientes primero
    async fn list_recent(&self, tenant_id: Option<&str>, limit: usize) -> Result<Vec<Alert>, RepositoryError>;
}

fn newest_first(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

const DEFAULT_IN_MEMORY_CAPACITY: usize = 10_000;

/// Repositorio en memoria
///
/// Al superar `capacity` descarta las alertas reconocidas más antiguas.
/// Las abiertas nunca se descartan.
#[derive(Clone)]
pub struct InMemoryAlertRepository {
    alerts: Arc<RwLock<Vec<Alert>>>,
    capacity: usize,
}

impl Default for InMemoryAlertRepository {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_IN_MEMORY_CAPACITY)
    }
}

impl InMemoryAlertRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            alerts: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn insert(&self, alert: &Alert) -> Result<(), RepositoryError> {
        let mut alerts = self.alerts.write().await;
        alerts.push(alert.clone());
        while alerts.len() > self.capacity {
            let oldest_acknowledged = alerts
                .iter()
                .enumerate()
                .filter(|(_, a)| !a.is_open())
                .min_by_key(|(_, a)| a.created_at)
                .map(|(index, _)| index);
            match oldest_acknowledged {
                Some(index) => {
                    alerts.remove(index);
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn acknowledge(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, RepositoryError> {
        let mut alerts = self.alerts.write().await;
        Ok(alerts.iter_mut().find(|a| a.id == id).map(|alert| {
            alert.acknowledged_at.get_or_insert(at);
            alert.clone()
        }))
    }

    async fn list_open(&self, tenant_id: Option<&str>) -> Result<Vec<Alert>, RepositoryError> {
        let mut open: Vec<Alert> = self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| a.is_open() && tenant_id.map_or(true, |t| a.tenant_id == t))
            .cloned()
            .collect();
        newest_first(&mut open);
        Ok(open)
    }

    async fn list_recent(&self, tenant_id: Option<&str>, limit: usize) -> Result<Vec<Alert>, RepositoryError> {
        let mut recent: Vec<Alert> = self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| tenant_id.map_or(true, |t| a.tenant_id == t))
            .cloned()
            .collect();
        newest_first(&mut recent);
        recent.truncate(limit);
        Ok(recent)
    }
}

/// Fila de la tabla `fleet_alerts`
#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    tenant_id: String,
    vehicle_id: String,
    kind: String,
    severity: String,
    message: String,
    created_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
    dedup_key: String,
}

impl TryFrom<AlertRow> for Alert {
    type Error = RepositoryError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let kind: AlertKind = row
            .kind
            .parse()
            .map_err(|reason| RepositoryError::Corrupt { id: row.id, reason })?;
        let severity: AlertSeverity = row
            .severity
            .parse()
            .map_err(|reason| RepositoryError::Corrupt { id: row.id, reason })?;
        Ok(Alert {
            id: row.id,
            tenant_id: row.tenant_id,
            vehicle_id: row.vehicle_id,
            kind,
            severity,
            message: row.message,
            created_at: row.created_at,
            acknowledged_at: row.acknowledged_at,
            dedup_key: row.dedup_key,
        })
    }
}

fn rows_to_alerts(rows: Vec<AlertRow>) -> Result<Vec<Alert>, RepositoryError> {
    rows.into_iter().map(Alert::try_from).collect()
}

/// Repositorio PostgreSQL
pub struct PgAlertRepository {
    pool: PgPool,
}

impl PgAlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Crea la tabla de alertas si no existe
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fleet_alerts (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                vehicle_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                acknowledged_at TIMESTAMPTZ,
                dedup_key TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS fleet_alerts_open_idx ON fleet_alerts (tenant_id, created_at DESC) WHERE acknowledged_at IS NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AlertRepository for PgAlertRepository {
    async fn insert(&self, alert: &Alert) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO fleet_alerts (id, tenant_id, vehicle_id, kind, severity, message, created_at, acknowledged_at, dedup_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.tenant_id)
        .bind(&alert.vehicle_id)
        .bind(alert.kind.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.created_at)
        .bind(alert.acknowledged_at)
        .bind(&alert.dedup_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn acknowledge(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, RepositoryError> {
        let row = sqlx::query_as::<_, AlertRow>(
            "UPDATE fleet_alerts SET acknowledged_at = COALESCE(acknowledged_at, $2) WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn list_open(&self, tenant_id: Option<&str>) -> Result<Vec<Alert>, RepositoryError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM fleet_alerts
            WHERE acknowledged_at IS NULL AND ($1::TEXT IS NULL OR tenant_id = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows_to_alerts(rows)
    }

    async fn list_recent(&self, tenant_id: Option<&str>, limit: usize) -> Result<Vec<Alert>, RepositoryError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM fleet_alerts
            WHERE ($1::TEXT IS NULL OR tenant_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows_to_alerts(rows)
    }
}
