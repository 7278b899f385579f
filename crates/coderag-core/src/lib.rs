//! Configuration and bootstrap for the coderag pipeline.

pub mod bootstrap;
pub mod config;

pub use bootstrap::{BootstrapError, Pipeline};
pub use config::{Config, ConfigError};
