//! Modelos del sistema
//!
//! Este módulo contiene los modelos de datos del motor de telemetría:
//! lecturas, estado en vivo, eventos de combustible, alertas, eficiencia e
//! informes diarios.

pub mod alert;
pub mod efficiency;
pub mod event;
pub mod fuel_event;
pub mod report;
pub mod telemetry;
pub mod vehicle;

pub use alert::{Alert, AlertKind, AlertSeverity, DedupKey};
pub use efficiency::{EfficiencySegment, EfficiencyWindow};
pub use event::FleetEvent;
pub use fuel_event::{ConsumptionFlag, FuelEvent, FuelEventKind};
pub use report::{DailyFuelReport, VehicleFuelSummary};
pub use telemetry::{Position, TelemetryReading};
pub use vehicle::{ConnectivityStatus, VehicleState};
