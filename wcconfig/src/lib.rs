//! # WaveCast Configuration Module
//!
//! This module provides configuration management for WaveCast, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Typed getters for configuration values
//! - Load-time validation of the fatal configuration errors
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use wcconfig::get_config;
//!
//! // Get the global configuration
//! let config = get_config();
//!
//! // Fatal checks first: the station must not start on a bad config
//! config.validate()?;
//!
//! let bitrate = config.get_bitrate();
//! let tracklist = config.get_tracklist();
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::Value;
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;

// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("wavecast.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load WaveCast configuration"));
}

const ENV_CONFIG_DIR: &str = "WAVECAST_CONFIG";
const ENV_PREFIX: &str = "WAVECAST_CONFIG__";

// Default values for configuration
const DEFAULT_PORT: u16 = 8128;
const DEFAULT_BITRATE: i64 = 128;
const DEFAULT_RECENT_CAPACITY: usize = 20;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

/// Macro to generate a getter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) => s,
                Ok(Value::Number(n)) => n.to_string(),
                _ => $default.to_string(),
            }
        }
    };
}

/// Macro to generate a getter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> usize {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap() as usize,
                Ok(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap().max(0) as usize,
                _ => $default,
            }
        }
    };
}

/// Configuration manager for WaveCast
///
/// Manages the application configuration: loading from YAML files,
/// merging with the embedded defaults, environment variable overrides,
/// and typed getters for configuration values.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(".wavecast").exists() {
            return ".wavecast".to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(".wavecast");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        // Default fallback
        ".wavecast".to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        // Create if doesn't exist
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        // Verify it's a directory
        if !path.is_dir() {
            return Err(anyhow!("The config path is not a directory"));
        }

        Ok(())
    }

    /// Loads the configuration, merging `config.yaml` from the config
    /// directory (if present) over the embedded defaults, then applying
    /// environment overrides, and writes the merged result back.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&config_dir))?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        // Load the embedded default configuration
        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        // Merge the external file over it, when there is one
        if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            let external_value: Value = serde_yaml::from_slice(&data)?;
            merge_yaml(&mut config_value, &external_value);
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
        }

        // Apply environment variable overrides
        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// The directory the configuration was loaded from
    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Gets a configuration value at the specified path
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["encoder", "bitrate"]`)
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                if let Some(next) = map.get(&Value::String(key.to_lowercase())) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Applies `WAVECAST_CONFIG__SECTION__KEY=value` overrides
    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(key_path) = key.strip_prefix(ENV_PREFIX) {
                let path: Vec<String> = key_path
                    .split("__")
                    .map(|part| part.to_lowercase())
                    .collect();
                if path.iter().any(|part| part.is_empty()) {
                    continue;
                }
                info!(key = %key, "Applying environment override");
                let parsed: Value = serde_yaml::from_str(&value)
                    .unwrap_or_else(|_| Value::String(value.clone()));
                Self::set_override(config, &path, parsed);
            }
        }
    }

    fn set_override(data: &mut Value, path: &[String], value: Value) {
        if path.is_empty() {
            *data = value;
            return;
        }
        if let Value::Mapping(map) = data {
            let key = Value::String(path[0].clone());
            if path.len() == 1 {
                map.insert(key, value);
            } else {
                let entry = map
                    .entry(key)
                    .or_insert(Value::Mapping(serde_yaml::Mapping::new()));
                Self::set_override(entry, &path[1..], value);
            }
        }
    }

    // ===== Typed getters =====

    impl_usize_config!(get_start_track, &["data", "starttrack"], 0);
    impl_usize_config!(
        get_recent_capacity,
        &["data", "recent_capacity"],
        DEFAULT_RECENT_CAPACITY
    );

    impl_string_config!(get_tracklist, &["data", "tracklist"], "tracks.txt");
    impl_string_config!(get_song_index_file, &["data", "songindex"], "/tmp/song.idx");
    impl_string_config!(get_recent_file, &["data", "recent"], "/tmp/recent.log");
    impl_string_config!(get_encoder_exe, &["encoder", "exe"], "/usr/local/bin/lame");
    impl_string_config!(get_bind_host, &["server", "host"], "0.0.0.0");
    impl_string_config!(get_station_name, &["server", "name"], "WaveCast Radio");
    impl_string_config!(get_station_genre, &["server", "genre"], "Various");

    /// Returns the raw configured bitrate in kbit/s.
    ///
    /// The value is range-checked by [`validate`](Self::validate); this
    /// getter reports it as configured.
    pub fn get_bitrate(&self) -> i64 {
        match self.get_value(&["encoder", "bitrate"]) {
            Ok(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap(),
            _ => DEFAULT_BITRATE,
        }
    }

    /// Returns the configured listener port, or the default if not configured or invalid.
    pub fn get_port(&self) -> u16 {
        match self.get_value(&["server", "port"]) {
            Ok(Value::Number(n)) if n.is_u64() => match u16::try_from(n.as_u64().unwrap()) {
                Ok(port) => port,
                Err(_) => {
                    tracing::warn!("Port out of range, using default {}", DEFAULT_PORT);
                    DEFAULT_PORT
                }
            },
            Ok(Value::String(s)) => match s.parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    tracing::warn!("Invalid port '{}', using default {}", s, DEFAULT_PORT);
                    DEFAULT_PORT
                }
            },
            _ => DEFAULT_PORT,
        }
    }

    /// Returns the minimum log level
    pub fn get_log_min_level(&self) -> String {
        match self.get_value(&["logs", "min_level"]) {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_LOG_MIN_LEVEL.to_string(),
        }
    }

    /// Checks the fatal configuration errors: a bad bitrate range, a
    /// missing encoder executable or a missing tracklist file abort
    /// startup with a descriptive message. The station must not start
    /// on any of them.
    pub fn validate(&self) -> Result<()> {
        let exe = self.get_encoder_exe();
        if !Path::new(&exe).is_file() {
            return Err(anyhow!("The encoder executable does not exist at {}.", exe));
        }

        let bitrate = self.get_bitrate();
        if !(0..=1024).contains(&bitrate) {
            return Err(anyhow!(
                "Set your bitrate to between 0 and 1024 not {}.",
                bitrate
            ));
        }

        let tracklist = self.get_tracklist();
        if !Path::new(&tracklist).is_file() {
            return Err(anyhow!("Tracklist file {} not found.", tracklist));
        }

        Ok(())
    }
}

/// Returns the global configuration singleton
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// Recursively merges two YAML value trees: for mappings, keys from
/// external are merged into default; scalars and sequences from
/// external replace the default values.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
