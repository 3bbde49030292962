//! Métricas de diagnóstico
//!
//! Contadores Prometheus del motor de telemetría. El registro pertenece a la
//! instancia (se crea al arrancar y viaja en el `AppState`), no es global.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Contadores de diagnóstico del pipeline
#[derive(Clone)]
pub struct Diagnostics {
    registry: Registry,
    pub telemetry_received: IntCounter,
    pub telemetry_rejected: IntCounterVec,
    pub readings_out_of_order: IntCounter,
    pub fuel_events: IntCounterVec,
    pub alerts_raised: IntCounterVec,
    pub alerts_suppressed: IntCounterVec,
    pub alert_persist_failures: IntCounter,
    pub observer_resyncs: IntCounter,
    pub watchdog_runs: IntCounterVec,
    pub vehicles_online: IntGauge,
}

impl Diagnostics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("fleet".to_string()), None)?;

        let telemetry_received = IntCounter::new("telemetry_received_total", "Telemetry messages received")?;
        let telemetry_rejected = IntCounterVec::new(
            Opts::new("telemetry_rejected_total", "Telemetry messages dropped by the decoder"),
            &["reason"],
        )?;
        let readings_out_of_order = IntCounter::new(
            "readings_out_of_order_total",
            "Readings discarded because they were not newer than the vehicle state",
        )?;
        let fuel_events = IntCounterVec::new(
            Opts::new("fuel_events_total", "Fuel level deltas by classification"),
            &["kind"],
        )?;
        let alerts_raised = IntCounterVec::new(Opts::new("alerts_raised_total", "Alerts created"), &["kind"])?;
        let alerts_suppressed = IntCounterVec::new(
            Opts::new("alerts_suppressed_total", "Alerts suppressed by the cool-down window"),
            &["kind"],
        )?;
        let alert_persist_failures = IntCounter::new(
            "alert_persist_failures_total",
            "Alerts dropped after the persistence retry failed",
        )?;
        let observer_resyncs = IntCounter::new(
            "observer_resyncs_total",
            "Resync markers delivered to lagging observers",
        )?;
        let watchdog_runs = IntCounterVec::new(
            Opts::new("watchdog_runs_total", "Offline watchdog runs by outcome"),
            &["outcome"],
        )?;
        let vehicles_online = IntGauge::new("vehicles_online", "Vehicles currently ONLINE")?;

        registry.register(Box::new(telemetry_received.clone()))?;
        registry.register(Box::new(telemetry_rejected.clone()))?;
        registry.register(Box::new(readings_out_of_order.clone()))?;
        registry.register(Box::new(fuel_events.clone()))?;
        registry.register(Box::new(alerts_raised.clone()))?;
        registry.register(Box::new(alerts_suppressed.clone()))?;
        registry.register(Box::new(alert_persist_failures.clone()))?;
        registry.register(Box::new(observer_resyncs.clone()))?;
        registry.register(Box::new(watchdog_runs.clone()))?;
        registry.register(Box::new(vehicles_online.clone()))?;

        Ok(Self {
            registry,
            telemetry_received,
            telemetry_rejected,
            readings_out_of_order,
            fuel_events,
            alerts_raised,
            alerts_suppressed,
            alert_persist_failures,
            observer_resyncs,
            watchdog_runs,
            vehicles_online,
        })
    }

    /// Exportar en formato de texto de Prometheus
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
