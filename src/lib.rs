//! Motor de telemetría y estado de flota
//!
//! Ingesta de lecturas de los vehículos, estado en vivo, detección de
//! eventos de combustible, alertas deduplicadas, eficiencia y canal en vivo
//! para los dashboards.

pub mod config;
pub mod controllers;
pub mod dto;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

pub use routes::create_app;
pub use state::AppState;
