//! Layered settings for the sync binary: a TOML file at an optional path,
//! overridden by `SYNC__`-prefixed environment variables, in the shape this
//! codebase's `Settings::new` already uses (`config` + `dotenvy`).

use std::time::Duration;

use config::{Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub database_url: String,
    pub blob_store_dir: Option<String>,
    #[serde(default = "default_poll_frequency_secs")]
    pub poll_frequency_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default)]
    pub search_index_enabled: bool,
    pub search_server_loc: Option<String>,
    pub fqdn: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_connections_per_account")]
    pub max_connections_per_account: usize,
}

fn default_poll_frequency_secs() -> u64 {
    30
}

fn default_heartbeat_secs() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_connections_per_account() -> usize {
    4
}

impl SyncSettings {
    pub fn load(config_path: Option<&str>) -> Result<Self, SettingsError> {
        let default_config_path = "config/sync.toml";
        let path_to_use = config_path.unwrap_or(default_config_path);

        let builder = config::Config::builder()
            .set_default("database_url", "sqlite://sync.db")?
            .set_default("poll_frequency_secs", default_poll_frequency_secs())?
            .set_default("heartbeat_secs", default_heartbeat_secs())?
            .set_default("search_index_enabled", false)?
            .set_default("max_retries", default_max_retries())?
            .set_default("max_connections_per_account", default_max_connections_per_account() as i64)?
            .add_source(File::with_name(path_to_use).required(false))
            .add_source(Environment::with_prefix("SYNC").separator("__"));

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    pub fn poll_frequency(&self) -> Duration {
        Duration::from_secs(self.poll_frequency_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// `SEARCH_SERVER_LOC` per §6, read directly rather than through the
    /// `SYNC__` prefix since it names an external service location shared
    /// with other parts of the deployment, not a setting private to this
    /// binary.
    pub fn search_server_loc(&self) -> Option<String> {
        self.search_server_loc.clone().or_else(|| std::env::var("SEARCH_SERVER_LOC").ok())
    }

    pub fn resolved_fqdn(&self) -> String {
        self.fqdn
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load or parse configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}
