// src/config/mod.rs
//! Analysis configuration management

pub mod constants;
pub mod loader;
pub mod tracking_config;

pub use constants::*;
pub use loader::{ConfigError, ConfigLoader};
pub use tracking_config::*;
