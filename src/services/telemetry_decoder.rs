//! Decodificador de telemetría
//!
//! Valida y normaliza los mensajes crudos del canal pub/sub. Un mensaje
//! inválido se descarta con su motivo; el dispositivo publica sin confirmación,
//! así que no hay reintento.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;
use validator::Validate;

use crate::config::FleetConfig;
use crate::models::{Position, TelemetryReading};

/// Errores de decodificación (datos del dispositivo, nunca alertas de flota)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unexpected topic '{0}', expected tenant/{{tenant}}/vehicles/{{vehicle}}/telemetry")]
    Topic(String),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("invalid fields: {0}")]
    Invalid(String),

    #[error("latitude and longitude must be sent together")]
    PartialPosition,

    #[error("timestamp {0} is not a valid epoch in milliseconds")]
    InvalidTimestamp(i64),

    #[error("timestamp {0} is too far in the future")]
    FutureTimestamp(i64),
}

impl DecodeError {
    /// Etiqueta corta para las métricas
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::Topic(_) => "topic",
            DecodeError::Payload(_) => "payload",
            DecodeError::MissingField(_) => "missing_field",
            DecodeError::OutOfRange { .. } | DecodeError::Invalid(_) => "range",
            DecodeError::PartialPosition => "partial_position",
            DecodeError::InvalidTimestamp(_) | DecodeError::FutureTimestamp(_) => "timestamp",
        }
    }
}

/// Identidad codificada en el topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAddress {
    pub tenant_id: String,
    pub vehicle_id: String,
}

impl TopicAddress {
    /// Parsear `tenant/{tenantId}/vehicles/{vehicleId}/telemetry`
    pub fn parse(topic: &str) -> Result<Self, DecodeError> {
        let parts: Vec<&str> = topic.split('/').collect();
        match parts.as_slice() {
            ["tenant", tenant, "vehicles", vehicle, "telemetry"]
                if !tenant.trim().is_empty() && !vehicle.trim().is_empty() =>
            {
                Ok(Self {
                    tenant_id: tenant.to_string(),
                    vehicle_id: vehicle.to_string(),
                })
            }
            _ => Err(DecodeError::Topic(topic.to_string())),
        }
    }

    pub fn topic(&self) -> String {
        format!("tenant/{}/vehicles/{}/telemetry", self.tenant_id, self.vehicle_id)
    }
}

/// Payload tal como lo publica el dispositivo. Campos desconocidos se ignoran.
#[derive(Debug, Deserialize, Validate)]
struct RawTelemetryPayload {
    timestamp: Option<i64>,

    #[validate(range(min = -90.0, max = 90.0))]
    latitude: Option<f64>,

    #[validate(range(min = -180.0, max = 180.0))]
    longitude: Option<f64>,

    #[serde(alias = "speed_kmh")]
    speed: Option<f64>,

    #[serde(alias = "fuel_level_liters")]
    fuel_level: Option<f64>,

    engine_on: Option<bool>,

    #[validate(range(min = 0.0, max = 360.0))]
    heading: Option<f64>,

    #[validate(range(min = 0.0))]
    odometer_km: Option<f64>,
}

/// Decodificador sin estado; los límites vienen de la configuración
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    tank_capacity_liters: f64,
    max_speed_kmh: f64,
    max_clock_skew: chrono::Duration,
}

impl TelemetryDecoder {
    pub fn new(config: &FleetConfig) -> Self {
        Self {
            tank_capacity_liters: config.tank_capacity_liters,
            max_speed_kmh: config.max_speed_kmh,
            max_clock_skew: config.max_clock_skew,
        }
    }

    /// Decodificar un mensaje del canal pub/sub
    pub fn decode(&self, topic: &str, payload: &[u8], now: DateTime<Utc>) -> Result<TelemetryReading, DecodeError> {
        let address = TopicAddress::parse(topic)?;
        self.decode_payload(&address, payload, now)
    }

    /// Decodificar el payload de un vehículo ya identificado
    pub fn decode_payload(
        &self,
        address: &TopicAddress,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<TelemetryReading, DecodeError> {
        let raw: RawTelemetryPayload =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Payload(e.to_string()))?;
        raw.validate().map_err(|e| DecodeError::Invalid(e.to_string()))?;

        let millis = raw.timestamp.ok_or(DecodeError::MissingField("timestamp"))?;
        let timestamp = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or(DecodeError::InvalidTimestamp(millis))?;
        if timestamp > now + self.max_clock_skew {
            return Err(DecodeError::FutureTimestamp(millis));
        }

        let speed_kmh = raw.speed.ok_or(DecodeError::MissingField("speed"))?;
        if !(0.0..=self.max_speed_kmh).contains(&speed_kmh) {
            return Err(DecodeError::OutOfRange {
                field: "speed",
                value: speed_kmh,
            });
        }

        let fuel_level_liters = raw.fuel_level.ok_or(DecodeError::MissingField("fuel_level"))?;
        if !(0.0..=self.tank_capacity_liters).contains(&fuel_level_liters) {
            return Err(DecodeError::OutOfRange {
                field: "fuel_level",
                value: fuel_level_liters,
            });
        }

        let position = match (raw.latitude, raw.longitude) {
            (Some(latitude), Some(longitude)) => Some(Position::new(latitude, longitude)),
            (None, None) => None,
            _ => return Err(DecodeError::PartialPosition),
        };

        Ok(TelemetryReading {
            tenant_id: address.tenant_id.clone(),
            vehicle_id: address.vehicle_id.clone(),
            timestamp,
            position,
            speed_kmh,
            fuel_level_liters,
            engine_on: raw.engine_on.unwrap_or(false),
            heading: raw.heading,
            odometer_km: raw.odometer_km,
        })
    }
}
