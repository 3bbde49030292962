//! Fan-out de eventos en vivo
//!
//! Publica cambios de estado y alertas a todos los dashboards conectados.
//! `publish` nunca bloquea: cada observador tiene una cola acotada y si se
//! queda atrás pierde los eventos más antiguos y recibe un `Resync`.
//!
//! La capacidad de cada cola se redondea a la siguiente potencia de dos
//! (así reserva `tokio::sync::broadcast`); `capacity()` devuelve la efectiva.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::FleetEvent;
use crate::utils::metrics::Diagnostics;

/// Información de un observador conectado
#[derive(Debug, Clone, Serialize)]
pub struct ObserverInfo {
    pub observer_id: String,
    pub connected_at: DateTime<Utc>,
}

type Registry = Arc<Mutex<HashMap<u64, ObserverInfo>>>;

#[derive(Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<FleetEvent>,
    observers: Registry,
    next_handle: Arc<AtomicU64>,
    capacity: usize,
    diagnostics: Diagnostics,
}

impl Broadcaster {
    pub fn new(capacity: usize, diagnostics: Diagnostics) -> Self {
        let effective = capacity.max(1).next_power_of_two();
        if effective != capacity {
            info!(
                "📡 Cola de observadores ajustada de {} a {} eventos (potencia de dos)",
                capacity, effective
            );
        }
        let (sender, _) = broadcast::channel(effective);
        Self {
            sender,
            capacity: effective,
            observers: Arc::new(Mutex::new(HashMap::new())),
            next_handle: Arc::new(AtomicU64::new(1)),
            diagnostics,
        }
    }

    /// Registra un observador; recibe los eventos publicados a partir de ahora
    pub fn subscribe(&self, observer_id: impl Into<String>) -> Subscription {
        let observer_id = observer_id.into();
        let receiver = self.sender.subscribe();

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut observers) = self.observers.lock() {
            observers.insert(
                handle,
                ObserverInfo {
                    observer_id: observer_id.clone(),
                    connected_at: Utc::now(),
                },
            );
        }
        info!("📡 Observador {} conectado", observer_id);

        Subscription {
            observer_id,
            handle,
            receiver,
            observers: self.observers.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    /// Publica un evento; devuelve a cuántos observadores llegó
    pub fn publish(&self, event: FleetEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            // Sin observadores conectados el evento simplemente se descarta
            Err(_) => 0,
        }
    }

    /// Observadores conectados
    pub fn observers(&self) -> Vec<ObserverInfo> {
        match self.observers.lock() {
            Ok(observers) => observers.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Eventos que cada observador puede acumular antes de recibir un `Resync`
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Flujo de eventos de un observador. Al soltarlo se da de baja.
pub struct Subscription {
    observer_id: String,
    handle: u64,
    receiver: broadcast::Receiver<FleetEvent>,
    observers: Registry,
    diagnostics: Diagnostics,
}

impl Subscription {
    pub fn observer_id(&self) -> &str {
        &self.observer_id
    }

    /// Siguiente evento en orden de publicación. `None` cuando el canal se cerró.
    pub async fn recv(&mut self) -> Option<FleetEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("🐢 Observador {} perdió {} eventos, resync", self.observer_id, missed);
                self.diagnostics.observer_resyncs.inc();
                Some(FleetEvent::Resync { missed })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Variante no bloqueante para tests y vaciado de cola
    pub fn try_recv(&mut self) -> Option<FleetEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                self.diagnostics.observer_resyncs.inc();
                Some(FleetEvent::Resync { missed })
            }
            Err(_) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.remove(&self.handle);
        }
        debug!("📴 Observador {} desconectado", self.observer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Alert, AlertKind, AlertSeverity};

    fn alert(n: usize) -> FleetEvent {
        FleetEvent::AlertRaised(Alert::new(
            "school-1",
            format!("bus-{}", n),
            AlertKind::Offline,
            AlertSeverity::Warning,
            "offline",
            Utc::now(),
        ))
    }

    fn vehicle_of(event: &FleetEvent) -> String {
        match event {
            FleetEvent::AlertRaised(alert) => alert.vehicle_id.clone(),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_every_observer_gets_events_in_order() {
        let broadcaster = Broadcaster::new(16, Diagnostics::new().unwrap());
        let mut a = broadcaster.subscribe("dash-a");
        let mut b = broadcaster.subscribe("dash-b");

        for i in 0..3 {
            assert_eq!(broadcaster.publish(alert(i)), 2);
        }
        for sub in [&mut a, &mut b] {
            for i in 0..3 {
                let event = sub.recv().await.unwrap();
                assert_eq!(vehicle_of(&event), format!("bus-{}", i));
            }
        }
    }

    #[tokio::test]
    async fn test_publish_without_observers_does_not_block() {
        let broadcaster = Broadcaster::new(2, Diagnostics::new().unwrap());
        for i in 0..10 {
            assert_eq!(broadcaster.publish(alert(i)), 0);
        }
    }

    #[tokio::test]
    async fn test_slow_observer_gets_resync_and_keeps_newest() {
        let diagnostics = Diagnostics::new().unwrap();
        let broadcaster = Broadcaster::new(4, diagnostics.clone());
        let mut slow = broadcaster.subscribe("slow");

        for i in 0..10 {
            broadcaster.publish(alert(i));
        }

        assert_eq!(slow.recv().await.unwrap(), FleetEvent::Resync { missed: 6 });
        for i in 6..10 {
            assert_eq!(vehicle_of(&slow.recv().await.unwrap()), format!("bus-{}", i));
        }
        assert!(slow.try_recv().is_none());
        assert_eq!(diagnostics.observer_resyncs.get(), 1);
    }

    #[tokio::test]
    async fn test_capacity_is_rounded_to_power_of_two() {
        let broadcaster = Broadcaster::new(3, Diagnostics::new().unwrap());
        assert_eq!(broadcaster.capacity(), 4);
        assert_eq!(Broadcaster::new(0, Diagnostics::new().unwrap()).capacity(), 1);
        assert_eq!(Broadcaster::new(256, Diagnostics::new().unwrap()).capacity(), 256);

        // Con 3 pedidos caben 4: el quinto evento provoca el resync
        let mut slow = broadcaster.subscribe("slow");
        for i in 0..4 {
            broadcaster.publish(alert(i));
        }
        assert_eq!(vehicle_of(&slow.try_recv().unwrap()), "bus-0");

        let mut lagging = broadcaster.subscribe("lagging");
        for i in 0..5 {
            broadcaster.publish(alert(i));
        }
        assert_eq!(lagging.try_recv(), Some(FleetEvent::Resync { missed: 1 }));
        assert_eq!(vehicle_of(&lagging.try_recv().unwrap()), "bus-1");
        drop(slow);
    }

    #[tokio::test]
    async fn test_drop_unregisters_observer() {
        let broadcaster = Broadcaster::new(4, Diagnostics::new().unwrap());
        let sub = broadcaster.subscribe("dash-a");
        assert_eq!(broadcaster.observers().len(), 1);
        assert_eq!(sub.observer_id(), "dash-a");
        drop(sub);
        assert!(broadcaster.observers().is_empty());
        assert_eq!(broadcaster.observer_count(), 0);
    }
}
