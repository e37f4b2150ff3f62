//! # Configuration Modules
//!
//! Loads channel settings from the layered JSON files of the running
//! executable.

/// Layered JSON configuration lookup and merge.
pub mod config_sys;

pub use config_sys::{
    get_runtime_config, load_channel_config, load_runtime_config, RuntimeConfig,
    RuntimeConfigError,
};
