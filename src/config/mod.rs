mod defaults;
mod io;
mod resolve;
mod types;
mod validation;

pub use defaults::*;
pub use io::*;
pub use resolve::*;
pub use types::*;
pub use validation::*;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level configuration for the memory subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub memory_search: MemorySearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    /// State directory for persistent data.
    #[serde(skip)]
    pub state_dir: PathBuf,
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    ///
    /// Invalid configuration is fatal here rather than when a manager is
    /// first constructed.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(find_config_file);

        let mut config = match config_path {
            Some(config_path) if config_path.exists() => {
                info!("Loading config from {}", config_path.display());
                load_config_file(&config_path)?
            }
            _ => {
                info!("No config file found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.state_dir = resolve_state_dir();

        validate_config_object(&config)?;
        Ok(config)
    }

    /// Build a config from an in-memory JSON value (used by embedders and
    /// tests that do not go through a file).
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let mut config: Config =
            serde_json::from_value(value).context("Invalid memory configuration")?;
        config.state_dir = resolve_state_dir();
        validate_config_object(&config)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MYLOBSTER_MEMORY_STORE_PATH") {
            self.memory_search
                .store
                .get_or_insert_with(Default::default)
                .path = Some(path);
        }

        if let Ok(level) = std::env::var("MYLOBSTER_LOG_LEVEL") {
            self.logging.level = Some(level);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agents: AgentsConfig::default(),
            memory_search: MemorySearchConfig::default(),
            logging: LoggingConfig::default(),
            state_dir: resolve_state_dir(),
        }
    }
}

/// Find the configuration file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let candidates = [
        PathBuf::from("mylobster.json"),
        PathBuf::from("mylobster.yaml"),
        PathBuf::from("mylobster.yml"),
        PathBuf::from("mylobster.toml"),
    ];

    for path in &candidates {
        if path.exists() {
            return Some(path.clone());
        }
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".mylobster").join("config.json");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

/// Resolve the state directory for persistent data.
fn resolve_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MYLOBSTER_STATE_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir()
        .map(|h| h.join(".mylobster"))
        .unwrap_or_else(|| PathBuf::from(".mylobster"))
}

/// Load configuration from a file path.
fn load_config_file(path: &Path) -> Result<Config> {
    let snapshot = read_config_file_snapshot(path)?;
    let config = serde_json::from_value(snapshot)
        .with_context(|| format!("Invalid configuration in '{}'", path.display()))?;
    Ok(config)
}
