//! Application configuration.
//!
//! `AppConfig` is read from TOML by `ConfigStore` and overridden by `CliArgs`.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{AppConfig, LogLevel};
pub use args::{CliArgs, Command};
pub use storage::{ConfigError, ConfigStore};
