//! Suscriptor de telemetría sobre Redis pub/sub
//!
//! Se suscribe al patrón de topics de los dispositivos, decodifica cada
//! mensaje y lo encola en el dispatcher. Si la conexión se pierde reconecta
//! con backoff exponencial; lo publicado mientras tanto se pierde.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use redis::RedisResult;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::services::ingestion_service::IngestionDispatcher;
use crate::services::telemetry_decoder::TelemetryDecoder;
use crate::utils::metrics::Diagnostics;

const BACKOFF_INITIAL_SECS: u64 = 1;
const BACKOFF_MAX_SECS: u64 = 60;

/// Retardo base antes del reintento número `attempt` (1 s, 2 s, 4 s ... hasta 60 s)
pub fn base_backoff(attempt: u32) -> Duration {
    let secs = BACKOFF_INITIAL_SECS
        .checked_shl(attempt)
        .unwrap_or(BACKOFF_MAX_SECS)
        .min(BACKOFF_MAX_SECS);
    Duration::from_secs(secs)
}

/// Retardo con hasta un 25% de jitter aleatorio
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = base_backoff(attempt);
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
    base + Duration::from_millis(jitter_ms)
}

enum SessionEnd {
    Shutdown,
    StreamClosed,
}

pub struct TelemetrySubscriber {
    client: redis::Client,
    pattern: String,
    decoder: TelemetryDecoder,
    dispatcher: IngestionDispatcher,
    diagnostics: Diagnostics,
    connected: Arc<AtomicBool>,
}

impl TelemetrySubscriber {
    pub fn new(
        redis_url: &str,
        pattern: impl Into<String>,
        decoder: TelemetryDecoder,
        dispatcher: IngestionDispatcher,
        diagnostics: Diagnostics,
    ) -> RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            pattern: pattern.into(),
            decoder,
            dispatcher,
            diagnostics,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Indicador compartido de conexión al broker, para el health check
    pub fn connection_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Bucle de suscripción con reconexión hasta la señal de apagado
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::StreamClosed) => {
                    warn!("🔌 Conexión pub/sub cerrada por el broker");
                    attempt = 0;
                }
                Err(e) => error!("❌ Error en la suscripción de telemetría: {}", e),
            }
            self.connected.store(false, Ordering::Relaxed);

            let delay = backoff_with_jitter(attempt);
            attempt = attempt.saturating_add(1);
            info!("🔄 Reintentando conexión al broker en {:?}", delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.connected.store(false, Ordering::Relaxed);
        info!("🛑 Suscriptor de telemetría detenido");
    }

    async fn session(&self, shutdown: &mut watch::Receiver<bool>) -> RedisResult<SessionEnd> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.psubscribe(&self.pattern).await?;
        self.connected.store(true, Ordering::Relaxed);
        info!("📥 Suscrito a telemetría en '{}'", self.pattern);

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                message = messages.next() => {
                    let Some(message) = message else {
                        return Ok(SessionEnd::StreamClosed);
                    };
                    self.handle_message(message.get_channel_name(), message.get_payload_bytes()).await;
                }
                _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
            }
        }
    }

    /// Decodifica y encola un mensaje; los inválidos se descartan con su motivo
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        self.diagnostics.telemetry_received.inc();

        let reading = match self.decoder.decode(topic, payload, Utc::now()) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("🗑️ Telemetría descartada de '{}': {}", topic, e);
                self.diagnostics.telemetry_rejected.with_label_values(&[e.reason()]).inc();
                return;
            }
        };

        debug!("📨 Lectura de {} en {}", reading.vehicle_id, reading.timestamp);
        if let Err(e) = self.dispatcher.dispatch(reading).await {
            warn!("⚠️ Lectura de '{}' no encolada: {}", topic, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::repositories::InMemoryAlertRepository;
    use crate::services::alert_manager::AlertManager;
    use crate::services::broadcaster::Broadcaster;
    use crate::services::condition_monitor::ConditionMonitor;
    use crate::services::fleet_store::FleetStore;
    use crate::services::fuel_detector::FuelEventDetector;
    use crate::services::ingestion_service::IngestionService;

    #[test]
    fn test_backoff_doubles_up_to_a_minute() {
        assert_eq!(base_backoff(0), Duration::from_secs(1));
        assert_eq!(base_backoff(1), Duration::from_secs(2));
        assert_eq!(base_backoff(5), Duration::from_secs(32));
        assert_eq!(base_backoff(6), Duration::from_secs(60));
        assert_eq!(base_backoff(200), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        for attempt in 0..10 {
            let base = base_backoff(attempt);
            let delay = backoff_with_jitter(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base / 4);
        }
    }

    #[tokio::test]
    async fn test_handle_message_decodes_and_dispatches() {
        let config = FleetConfig::default();
        let diagnostics = Diagnostics::new().unwrap();
        let store = FleetStore::new(100);
        let alerts = AlertManager::new(
            Arc::new(InMemoryAlertRepository::new()),
            config.alert_cooldown,
            diagnostics.clone(),
        );
        let service = IngestionService::new(
            store.clone(),
            FuelEventDetector::from_config(&config),
            ConditionMonitor::from_config(&config),
            alerts,
            Broadcaster::new(16, diagnostics.clone()),
            diagnostics.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, handles) = IngestionDispatcher::spawn(service, 2, 16, shutdown_rx);

        // Client::open no conecta; basta para probar el camino de mensajes
        let subscriber = TelemetrySubscriber::new(
            "redis://127.0.0.1:6379",
            config.topic_pattern.clone(),
            TelemetryDecoder::new(&config),
            dispatcher,
            diagnostics.clone(),
        )
        .unwrap();

        let payload = serde_json::json!({
            "timestamp": Utc::now().timestamp_millis(),
            "speed": 30.0,
            "fuel_level": 55.0,
            "engine_on": true
        });
        subscriber
            .handle_message("tenant/school-1/vehicles/bus-7/telemetry", payload.to_string().as_bytes())
            .await;
        subscriber.handle_message("tenant/school-1/bus-7", b"{}").await;

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(diagnostics.telemetry_received.get(), 2);
        assert_eq!(diagnostics.telemetry_rejected.with_label_values(&["topic"]).get(), 1);
        assert_eq!(store.get("bus-7").await.unwrap().fuel_level_liters, 55.0);
        assert!(!subscriber.connection_flag().load(Ordering::Relaxed));
    }
}
