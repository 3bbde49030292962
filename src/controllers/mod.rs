//! Controladores de la API HTTP

pub mod alert_controller;
pub mod fleet_controller;

pub use alert_controller::AlertController;
pub use fleet_controller::FleetController;
