//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the flat `key = value` file that
//! sits next to the game executable, generating defaults on first run.
//! Nothing outside this module touches the file system for settings.

pub mod config;

pub use config::{ConfigError, ConfigFile, DEFAULT_CONFIG_FILE};
