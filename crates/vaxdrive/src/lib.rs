pub mod config;
pub mod drives;
pub mod error;
pub mod telemetry;
