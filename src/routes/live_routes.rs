//! Canal en vivo (Server-Sent Events)
//!
//! Cada conexión es un observador del fan-out. El filtro por tenant se aplica
//! aquí; los marcadores `resync` se entregan siempre.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

use crate::dto::fleet_dto::LiveQuery;
use crate::models::FleetEvent;
use crate::services::Subscription;
use crate::state::AppState;

pub fn create_live_router() -> Router<AppState> {
    Router::new().route("/live", get(live_events))
}

async fn live_events(
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let observer = query
        .observer
        .unwrap_or_else(|| format!("observer-{}", Uuid::new_v4()));
    let subscription = state.broadcaster.subscribe(observer);

    let stream = stream::unfold((subscription, query.tenant), |(mut subscription, tenant)| async move {
        let event = next_event(&mut subscription, tenant.as_deref()).await?;
        Some((Ok(event), (subscription, tenant)))
    });

    Sse::new(stream.take_until(shutdown_requested(state.shutdown))).keep_alive(KeepAlive::default())
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Siguiente evento visible para el observador, ya serializado
async fn next_event(subscription: &mut Subscription, tenant: Option<&str>) -> Option<Event> {
    loop {
        let event = subscription.recv().await?;
        if !visible_to(&event, tenant) {
            continue;
        }
        match Event::default().event(event.name()).json_data(&event) {
            Ok(sse) => return Some(sse),
            Err(e) => warn!("⚠️ Evento {} no serializable: {}", event.name(), e),
        }
    }
}

fn visible_to(event: &FleetEvent, tenant: Option<&str>) -> bool {
    match (tenant, event.tenant_id()) {
        (Some(wanted), Some(owner)) => wanted == owner,
        _ => true,
    }
}
