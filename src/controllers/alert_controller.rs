use uuid::Uuid;
use validator::Validate;

use crate::dto::fleet_dto::{AlertsQuery, ApiResponse};
use crate::models::Alert;
use crate::services::AlertManager;
use crate::utils::errors::AppError;

const DEFAULT_RECENT_LIMIT: u32 = 50;

pub struct AlertController {
    alerts: AlertManager,
}

impl AlertController {
    pub fn new(alerts: AlertManager) -> Self {
        Self { alerts }
    }

    pub async fn list(&self, query: AlertsQuery) -> Result<Vec<Alert>, AppError> {
        query.validate()?;
        let tenant = query.tenant.as_deref();

        let alerts = if query.open.unwrap_or(true) {
            self.alerts.list_open(tenant).await?
        } else {
            let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT) as usize;
            self.alerts.list_recent(tenant, limit).await?
        };
        Ok(alerts)
    }

    pub async fn acknowledge(&self, id: Uuid) -> Result<ApiResponse<Alert>, AppError> {
        let alert = self.alerts.acknowledge(id).await?;
        Ok(ApiResponse::success_with_message(
            alert,
            "Alert acknowledged".to_string(),
        ))
    }
}
