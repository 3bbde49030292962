//! Eventos del canal en vivo hacia los dashboards

use serde::{Deserialize, Serialize};

use super::alert::Alert;
use super::vehicle::VehicleState;

/// Evento publicado por el fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FleetEvent {
    StateUpdate(VehicleState),
    AlertRaised(Alert),
    /// El observador perdió eventos y debe recargar el estado completo
    Resync { missed: u64 },
}

impl FleetEvent {
    /// Nombre del evento para SSE
    pub fn name(&self) -> &'static str {
        match self {
            FleetEvent::StateUpdate(_) => "state_update",
            FleetEvent::AlertRaised(_) => "alert_raised",
            FleetEvent::Resync { .. } => "resync",
        }
    }

    /// Tenant al que pertenece el evento; `None` para marcadores de control
    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            FleetEvent::StateUpdate(state) => Some(&state.tenant_id),
            FleetEvent::AlertRaised(alert) => Some(&alert.tenant_id),
            FleetEvent::Resync { .. } => None,
        }
    }
}
