//! Alertmanager integration: routing config document and HTTP API client

pub mod client;
pub mod config;
pub mod models;

pub use client::{AlertEngine, AlertmanagerClient};
pub use config::AlertmanagerConfig;
pub use models::{EngineAlert, FiredAlert};
