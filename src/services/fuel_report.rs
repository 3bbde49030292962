//! Informe diario de combustible
//!
//! Cada medianoche UTC resume el consumo del día anterior por vehículo a
//! partir del servicio de eficiencia. El último informe generado queda
//! disponible para la API.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::{error, info};

use crate::models::{DailyFuelReport, VehicleFuelSummary};
use crate::services::efficiency_service::EfficiencyService;
use crate::services::fleet_store::FleetStore;
use crate::utils::AppResult;

#[derive(Clone)]
pub struct FuelReportService {
    store: FleetStore,
    efficiency: EfficiencyService,
    latest: Arc<RwLock<Option<DailyFuelReport>>>,
}

impl FuelReportService {
    pub fn new(store: FleetStore, efficiency: EfficiencyService) -> Self {
        Self {
            store,
            efficiency,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Resumen del día `date` (UTC) para un tenant o para toda la flota
    pub async fn daily_summary(&self, date: NaiveDate, tenant_id: Option<&str>) -> AppResult<DailyFuelReport> {
        let from = date.and_time(NaiveTime::MIN).and_utc();
        let to = from + Duration::days(1) - Duration::milliseconds(1);

        let mut vehicles = Vec::new();
        for state in self.store.list_all().await {
            if tenant_id.is_some_and(|t| state.tenant_id != t) {
                continue;
            }
            let window = self.efficiency.compute_efficiency(&state.vehicle_id, from, to).await?;
            if window.fuel_consumed_liters <= 0.0 {
                continue;
            }
            vehicles.push(VehicleFuelSummary {
                vehicle_id: state.vehicle_id,
                tenant_id: state.tenant_id,
                fuel_consumed_liters: window.fuel_consumed_liters,
                distance_km: window.distance_km,
                km_per_liter: window.km_per_liter,
            });
        }

        Ok(DailyFuelReport {
            date,
            tenant_id: tenant_id.map(str::to_string),
            generated_at: Utc::now(),
            total_fuel_consumed_liters: vehicles.iter().map(|v| v.fuel_consumed_liters).sum(),
            total_distance_km: vehicles.iter().map(|v| v.distance_km).sum(),
            vehicles,
        })
    }

    /// Último informe de flota generado por la tarea programada
    pub async fn latest(&self) -> Option<DailyFuelReport> {
        self.latest.read().await.clone()
    }

    /// Genera el informe del día anterior cada medianoche UTC hasta el apagado
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("📊 Informe diario de combustible programado a las 00:00 UTC");
        loop {
            let wait = until_next_midnight(Utc::now());
            tokio::select! {
                _ = tokio::time::sleep(wait) => self.generate(Utc::now().date_naive() - Duration::days(1)).await,
                _ = shutdown.changed() => break,
            }
        }
        info!("🛑 Informe diario detenido");
    }

    async fn generate(&self, date: NaiveDate) {
        match self.daily_summary(date, None).await {
            Ok(report) => {
                info!(
                    "📊 Consumo del {}: {:.1} L en {:.1} km ({} vehículos)",
                    report.date,
                    report.total_fuel_consumed_liters,
                    report.total_distance_km,
                    report.vehicles.len()
                );
                *self.latest.write().await = Some(report);
            }
            Err(e) => error!("❌ No se pudo generar el informe del {}: {}", date, e),
        }
    }
}

fn until_next_midnight(now: DateTime<Utc>) -> StdDuration {
    let next = (now.date_naive() + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
    (next - now).to_std().unwrap_or(StdDuration::from_secs(1))
}
