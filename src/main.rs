use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use fleet_telemetry::config::database::DatabaseConfig;
use fleet_telemetry::config::{EnvironmentConfig, FleetConfig};
use fleet_telemetry::repositories::{AlertRepository, InMemoryAlertRepository, PgAlertRepository};
use fleet_telemetry::services::TelemetrySubscriber;
use fleet_telemetry::{create_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Cargar variables de entorno
    dotenv().ok();

    let config = EnvironmentConfig::from_env()?;
    let fleet = FleetConfig::from_env()?;

    // Configurar logging
    tracing_subscriber::fmt().with_max_level(config.log_level).init();

    info!("🚌 Fleet Telemetry Engine");
    info!("=========================");
    info!("🔧 Entorno: {}", config.environment);

    // Persistencia de alertas
    let repository: Arc<dyn AlertRepository> = match &config.database_url {
        Some(url) => {
            let database = DatabaseConfig::new(url.clone());
            info!("🗄️ Conectando a PostgreSQL en {}", database.masked_url());
            let pool = database.create_pool().await.map_err(|e| {
                error!("❌ Error conectando a la base de datos: {}", e);
                anyhow::anyhow!("Error de base de datos: {}", e)
            })?;
            let repository = PgAlertRepository::new(pool);
            repository.ensure_schema().await?;
            Arc::new(repository)
        }
        None => {
            warn!("⚠️ DATABASE_URL no definido: las alertas se guardan solo en memoria");
            Arc::new(InMemoryAlertRepository::new())
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (mut app_state, workers) = AppState::new(config.clone(), fleet.clone(), repository, shutdown_rx.clone())?;
    app_state.alerts.warm_up().await?;

    // Ingesta pub/sub
    let subscriber_handle = match &config.redis_url {
        Some(url) => {
            let subscriber = TelemetrySubscriber::new(
                url,
                fleet.topic_pattern.clone(),
                app_state.decoder.clone(),
                app_state.dispatcher.clone(),
                app_state.diagnostics.clone(),
            )?;
            app_state.broker_connected = Some(subscriber.connection_flag());
            Some(tokio::spawn(subscriber.run(shutdown_rx.clone())))
        }
        None => {
            warn!("⚠️ REDIS_URL no definido: solo ingesta HTTP");
            None
        }
    };

    let watchdog_handle = tokio::spawn(app_state.watchdog().run(shutdown_rx.clone()));
    let report_handle = tokio::spawn(app_state.reports.clone().run(shutdown_rx));

    let app = create_app(app_state);
    let addr: SocketAddr = config.server_url().parse()?;

    info!("🌐 Servidor iniciando en http://{}", addr);
    info!("🔍 Endpoints disponibles:");
    info!("   GET  /health - Health check");
    info!("   GET  /metrics - Métricas Prometheus");
    info!("🚌 Endpoints - Flota:");
    info!("   GET  /fleet/state - Estado de la flota");
    info!("   GET  /fleet/:id/state - Estado de un vehículo");
    info!("   GET  /fleet/:id/efficiency - Eficiencia de combustible");
    info!("   GET  /fleet/reports/daily - Informe diario de combustible");
    info!("   GET  /fleet/alerts - Alertas");
    info!("   POST /fleet/alerts/:id/ack - Reconocer alerta");
    info!("   POST /fleet/telemetry/:tenant/:vehicle - Ingesta HTTP");
    info!("   GET  /fleet/live - Canal en vivo (SSE)");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let graceful = async move {
        shutdown_signal().await;
        // Cierra los streams SSE y detiene las tareas de fondo
        shutdown_tx.send(true).ok();
    };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(graceful).await {
        error!("❌ Error del servidor: {}", e);
    }

    if let Some(handle) = subscriber_handle {
        handle.await.ok();
    }
    watchdog_handle.await.ok();
    report_handle.await.ok();
    for worker in workers {
        worker.await.ok();
    }

    info!("👋 Servidor terminado");
    Ok(())
}

/// Señal de apagado graceful
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ No se pudo instalar el handler de Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("❌ No se pudo instalar el handler de SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("🛑 Señal Ctrl+C recibida, apagando servidor...");
        },
        _ = terminate => {
            info!("🛑 Señal de terminación recibida, apagando servidor...");
        },
    }
}
