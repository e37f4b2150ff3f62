//! # System Configuration
//!
//! Resolves the layered JSON configuration of the running executable and
//! extracts the `channel` section from it.
//!
//! Files are looked up in `CONFIGS_LOCATION` (default: the executable's
//! directory) and layered in this order, later files overriding earlier ones
//! key by key:
//!
//! 1. `config.global.json`
//! 2. `<basename>.common.json`
//! 3. `<basename>.<mode>.json`
//! 4. `<basename>.<mode>.<os>.json`
//!
//! `<mode>` comes from the `RUNNING_MODE_<BASENAME>` environment variable.
//! Missing files are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fmt};

use config::{ext::*, *};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::ChannelConfig;

const CONFIG_GLOBAL_NAME: &str = "config.global.json";
const CHANNEL_SECTION: &str = "channel";

/// Errors raised while locating, reading or interpreting configuration files.
#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    /// Reading a file or inspecting the executable failed.
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    /// An environment variable could not be read.
    #[error("Environment variable error: {0}")]
    VarError(#[from] env::VarError),

    /// A required environment variable is not set.
    #[error("Environment variable {0} is not present")]
    MissingEnvVar(String),

    /// The configuration files could not be loaded (unreadable or not JSON).
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    /// The layered configuration has no section with this name.
    #[error("Configuration section '{0}' is missing")]
    MissingSection(String),

    /// A section does not match the expected shape.
    #[error("Configuration section '{section}' is invalid: {reason}")]
    InvalidSection {
        /// The section name.
        section: String,
        /// What the deserializer reported.
        reason: String,
    },
}

/// # Runtime Configuration
///
/// Which files were found for the running executable and the flattened
/// `section:key` options they produced. Paths of files that do not exist are
/// left empty.
#[derive(Default, Debug, Serialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeConfig {
    /// The running mode (e.g. `dev`, `prod`).
    pub config_running_mode: String,
    /// The directory that was searched.
    pub config_dir: String,
    /// Path of the global file, if found.
    pub config_global_file: String,
    /// Path of the common file, if found.
    pub config_common_file: String,
    /// Path of the mode file, if found.
    pub config_mode_file: String,
    /// Path of the platform file, if found.
    pub config_platform_file: String,
    /// Every option of the layered configuration, keyed `section:key`.
    pub config_options: BTreeMap<String, String>,
}

impl fmt::Display for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuntimeConfig
    Running mode: {},
    Config dir: {},
    Global file: {},
    Common file: {},
    Mode file: {},
    Platform file: {},
    Options: {}
",
            self.config_running_mode,
            self.config_dir,
            self.config_global_file,
            self.config_common_file,
            self.config_mode_file,
            self.config_platform_file,
            self.config_options.len(),
        )
    }
}

/// Top-level sections this crate reads.
#[derive(Deserialize)]
struct Sections {
    channel: ChannelConfig,
}

impl RuntimeConfig {
    /// Binds the `channel` section to a `ChannelConfig`. Keys that are absent
    /// fall back to their defaults.
    pub fn channel_config(&self) -> Result<ChannelConfig, RuntimeConfigError> {
        let prefix = format!("{}:", CHANNEL_SECTION);
        if !self
            .config_options
            .keys()
            .any(|key| key.to_lowercase().starts_with(&prefix))
        {
            return Err(RuntimeConfigError::MissingSection(
                CHANNEL_SECTION.to_string(),
            ));
        }

        let root = build_configuration(&self.layer_files())?;
        let sections: Sections = config::ext::from_config(root.as_config().as_ref())
            .map_err(|e| RuntimeConfigError::InvalidSection {
                section: CHANNEL_SECTION.to_string(),
                reason: e.to_string(),
            })?;
        Ok(sections.channel)
    }

    fn layer_files(&self) -> Vec<String> {
        [
            &self.config_global_file,
            &self.config_common_file,
            &self.config_mode_file,
            &self.config_platform_file,
        ]
        .into_iter()
        .filter(|file| !file.is_empty())
        .cloned()
        .collect()
    }
}

/// # Get Runtime Config
///
/// Resolves and layers the configuration files of the current executable.
pub fn get_runtime_config() -> Result<RuntimeConfig, RuntimeConfigError> {
    let current_exe: PathBuf = env::current_exe()?;
    let basename: String = get_process_basename(&current_exe)?;
    let location: String = get_process_location(&current_exe)?;
    let running_mode: String = get_running_mode(&basename)?;
    let config_dir: String = env::var("CONFIGS_LOCATION").unwrap_or(location);

    load_runtime_config(Path::new(&config_dir), &basename, &running_mode)
}

/// Shortcut for `get_runtime_config()?.channel_config()`.
pub fn load_channel_config() -> Result<ChannelConfig, RuntimeConfigError> {
    get_runtime_config()?.channel_config()
}

/// # Load Runtime Config
///
/// Layers the configuration files for `basename` in `running_mode` found in
/// `config_dir`.
pub fn load_runtime_config(
    config_dir: &Path,
    basename: &str,
    running_mode: &str,
) -> Result<RuntimeConfig, RuntimeConfigError> {
    let mut runtime = RuntimeConfig {
        config_running_mode: running_mode.to_string(),
        config_dir: config_dir.to_string_lossy().to_string(),
        config_global_file: existing(config_dir.join(CONFIG_GLOBAL_NAME)),
        config_common_file: existing(config_dir.join(format!("{}.common.json", basename))),
        config_mode_file: existing(config_dir.join(format!("{}.{}.json", basename, running_mode))),
        config_platform_file: existing(config_dir.join(format!(
            "{}.{}.{}.json",
            basename,
            running_mode,
            env::consts::OS
        ))),
        config_options: BTreeMap::new(),
    };

    let config_data = build_configuration(&runtime.layer_files())?;
    for (key, value) in config_data.iter(None) {
        runtime
            .config_options
            .insert(key.to_string(), value.to_string());
    }
    Ok(runtime)
}

fn build_configuration(files: &[String]) -> Result<Box<dyn ConfigurationRoot>, RuntimeConfigError> {
    let mut builder = DefaultConfigurationBuilder::new();
    for file in files {
        builder.add_json_file(&file.is().optional());
    }
    builder
        .build()
        .map_err(|e| RuntimeConfigError::LoadError(format!("{:?}", e)))
}

fn existing(path: PathBuf) -> String {
    if path.is_file() {
        path.to_string_lossy().to_string()
    } else {
        String::new()
    }
}

fn get_process_basename(exe_path: &Path) -> Result<String, RuntimeConfigError> {
    exe_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|s| s.to_owned())
        .ok_or_else(|| {
            RuntimeConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "Failed to get the process basename",
            ))
        })
}

fn get_process_location(exe_path: &Path) -> Result<String, RuntimeConfigError> {
    exe_path
        .parent()
        .and_then(|dir| dir.to_str())
        .map(|s| s.to_owned())
        .ok_or_else(|| {
            RuntimeConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "Failed to get the process location",
            ))
        })
}

fn get_running_mode(basename: &str) -> Result<String, RuntimeConfigError> {
    let envar: String = format!("RUNNING_MODE_{}", basename.to_uppercase());
    match env::var(&envar) {
        Ok(mode) => Ok(mode),
        Err(env::VarError::NotPresent) => Err(RuntimeConfigError::MissingEnvVar(envar)),
        Err(e) => Err(RuntimeConfigError::VarError(e)),
    }
}
