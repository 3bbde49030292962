//! Services module
//!
//! Este módulo contiene la lógica del motor de telemetría: decodificación,
//! estado en vivo, detección de eventos de combustible, reglas de operación,
//! alertas, eficiencia, informe diario, watchdog de conectividad y fan-out a
//! los dashboards.

pub mod alert_manager;
pub mod broadcaster;
pub mod condition_monitor;
pub mod efficiency_service;
pub mod fleet_store;
pub mod fuel_detector;
pub mod fuel_report;
pub mod ingestion_service;
pub mod telemetry_decoder;
pub mod telemetry_subscriber;
pub mod watchdog;

pub use alert_manager::{AlertError, AlertManager, RaiseOutcome};
pub use broadcaster::{Broadcaster, Subscription};
pub use condition_monitor::ConditionMonitor;
pub use efficiency_service::EfficiencyService;
pub use fleet_store::{FleetStore, StoreError, UpsertOutcome};
pub use fuel_detector::FuelEventDetector;
pub use fuel_report::FuelReportService;
pub use ingestion_service::{IngestionDispatcher, IngestionService};
pub use telemetry_decoder::{DecodeError, TelemetryDecoder, TopicAddress};
pub use telemetry_subscriber::TelemetrySubscriber;
pub use watchdog::OfflineWatchdog;
