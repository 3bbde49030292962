//! Configuración de variables de entorno
//!
//! Este módulo maneja la configuración del entorno del servidor: puerto,
//! orígenes CORS, nivel de logging y las URLs de Redis y PostgreSQL.

use std::env;
use std::str::FromStr;

use thiserror::Error;

/// Errores al leer la configuración desde el entorno
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Lee una variable de entorno y la parsea, usando `default` si no existe
pub(crate) fn env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Lee una variable opcional (vacía cuenta como ausente)
pub(crate) fn env_opt(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Configuración del entorno
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub environment: String,
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub log_level: tracing::Level,
    /// Broker de pub/sub; sin él solo queda la ingesta HTTP
    pub redis_url: Option<String>,
    /// Persistencia de alertas; sin él se usan alertas en memoria
    pub database_url: Option<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            port: 3000,
            host: "0.0.0.0".to_string(),
            cors_origins: Vec::new(),
            log_level: tracing::Level::INFO,
            redis_url: None,
            database_url: None,
        }
    }
}

impl EnvironmentConfig {
    /// Construir la configuración a partir de las variables de entorno
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            environment: env_or("ENVIRONMENT", defaults.environment)?,
            port: env_or("PORT", defaults.port)?,
            host: env_or("HOST", defaults.host)?,
            cors_origins: env_opt("CORS_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            log_level: env_or("LOG_LEVEL", defaults.log_level)?,
            redis_url: env_opt("REDIS_URL"),
            database_url: env_opt("DATABASE_URL"),
        })
    }

    /// Verificar si estamos en modo desarrollo
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Obtener la dirección del servidor
    pub fn server_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
