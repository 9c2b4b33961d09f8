//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `MOD_DATA_DIR` and `MOD_LOG_LEVEL` env overrides. The
//! resolved [`Config`] is passed by reference to whoever needs it; nothing
//! past [`load`] reads the process environment.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    error::AppError,
    logger,
    identity::{DEFAULT_KEY_BITS, DEVICE_DIR_NAME},
};

/// Smallest RSA modulus accepted from config.
pub const MIN_KEY_BITS: usize = 1024;

/// Fully-resolved provisioner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base data directory (already expanded, no `~`).
    pub data_dir: PathBuf,
    /// RSA modulus size for newly generated keypairs.
    pub key_bits: usize,
    pub log_level: String,
    /// Append log output here instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Defaults rooted at `data_dir`, for callers that don't load a file.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            key_bits: DEFAULT_KEY_BITS,
            log_level: default_log_level(),
            log_file: None,
        }
    }

    /// `<data_dir>/device`, the credential store location.
    pub fn device_dir(&self) -> PathBuf {
        self.data_dir.join(DEVICE_DIR_NAME)
    }
}

/// Env-sourced overrides, collected once by [`load`].
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    provisioner: RawProvisioner,
}

#[derive(Deserialize)]
struct RawProvisioner {
    data_dir: String,
    #[serde(default = "default_key_bits")]
    key_bits: usize,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

fn default_key_bits() -> usize { DEFAULT_KEY_BITS }
fn default_log_level() -> String { "info".to_string() }

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let overrides = Overrides {
        data_dir: env::var("MOD_DATA_DIR").ok(),
        log_level: env::var("MOD_LOG_LEVEL").ok(),
    };
    load_from(Path::new("config/default.toml"), &overrides)
}

/// Internal loader — accepts an explicit path and overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let p = parsed.provisioner;

    let data_dir_str = overrides.data_dir.as_deref().unwrap_or(&p.data_dir);
    if data_dir_str.trim().is_empty() {
        return Err(AppError::Config("data_dir must not be empty".into()));
    }
    let data_dir = expand_home(data_dir_str);

    if p.key_bits < MIN_KEY_BITS {
        return Err(AppError::Config(format!(
            "key_bits = {} is below the minimum of {MIN_KEY_BITS}",
            p.key_bits
        )));
    }

    let log_level = overrides.log_level.clone().unwrap_or(p.log_level);
    logger::parse_level(&log_level)
        .map_err(|e| AppError::Config(format!("log_level: {e}")))?;

    Ok(Config {
        data_dir,
        key_bits: p.key_bits,
        log_level,
        log_file: p.log_file.as_deref().map(expand_home),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
