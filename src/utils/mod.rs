//! Utilidades del sistema
//!
//! Este módulo contiene utilidades para manejo de errores, cálculos
//! geográficos y métricas de diagnóstico.

pub mod errors;
pub mod geo;
pub mod metrics;

pub use errors::*;
