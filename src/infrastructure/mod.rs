//! Infrastructure layer - Adapters, services and runtime wiring

pub mod analytics;
pub mod database;
pub mod factory;
pub mod key;
pub mod logging;
pub mod plugin;
pub mod rate_limit;
