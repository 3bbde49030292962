//! Repositorios
//!
//! Acceso a la persistencia de las alertas de flota.

pub mod alert_repository;

pub use alert_repository::{AlertRepository, InMemoryAlertRepository, PgAlertRepository, RepositoryError};
