//! Configuración del proyecto
//!
//! Este módulo contiene la configuración del servidor, de la base de datos
//! y los umbrales del motor de telemetría.

pub mod database;
pub mod environment;
pub mod fleet;

pub use environment::*;
pub use fleet::*;
