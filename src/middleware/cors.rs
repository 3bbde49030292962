//! Middleware de CORS
//!
//! Este módulo maneja la configuración de CORS para que los dashboards
//! puedan consultar la API y abrir el canal en vivo desde otros orígenes.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::EnvironmentConfig;

/// CORS según la configuración: sin orígenes declarados solo se permite todo en desarrollo
pub fn cors_layer(config: &EnvironmentConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        if config.is_development() {
            return CorsLayer::very_permissive();
        }
        tracing::warn!("⚠️ CORS_ORIGINS vacío fuera de desarrollo: no se aceptan orígenes externos");
    }
    cors_with_origins(&config.cors_origins)
}

/// Crear middleware de CORS con orígenes específicos
pub fn cors_with_origins(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("⚠️ Origen CORS inválido ignorado: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("accept"),
            HeaderName::from_static("cache-control"),
            HeaderName::from_static("last-event-id"),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_declared_origin_is_allowed() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(cors_with_origins(&["https://dash.example.com".to_string()]));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("origin", "https://dash.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "https://dash.example.com"
        );
    }
}
