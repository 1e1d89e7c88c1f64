//! Core types shared by the library and the CLI.
//!
//! Currently this is the configuration layer: the TOML config file, server
//! entries and the validated keep-alive interval.

mod config;

pub use config::{
    Config, ConfigError, KeepAliveConfig, PingInterval, ServerEntry,
    DEFAULT_PING_INTERVAL_SECONDS, LOCAL_CONFIG_FILE,
};
