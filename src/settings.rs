use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    /// Empty when the lamp address is unknown
    pub address: String,
    pub local_key: String,
    pub version: String,
    pub timeout_ms: u64,
    pub command_delay_ms: u64,
}

impl Device {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub static_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scheduler {
    pub poll_interval_ms: u64,
    pub history_limit: usize,
}

impl Scheduler {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub device: Device,
    pub server: Server,
    pub scheduler: Scheduler,
    pub logger: Logger,
}

impl Settings {
    /// Loads built-in defaults, `config/default.toml`, the optional file and
    /// `LAMP_*` environment variables, later sources winning
    ///
    /// Nested keys use a double underscore: `LAMP_SERVER__PORT=8080`.
    pub fn new(config_file: Option<&Path>) -> Result<Self> {
        let mut builder =
            Self::defaults()?.add_source(File::with_name("config/default").required(false));

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("LAMP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    fn defaults() -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("device.id", "")?
            .set_default("device.address", "")?
            .set_default("device.local_key", "")?
            .set_default("device.version", "3.3")?
            .set_default("device.timeout_ms", 5000)?
            .set_default("device.command_delay_ms", 300)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("server.static_dir", "static")?
            .set_default("scheduler.poll_interval_ms", 1000)?
            .set_default("scheduler.history_limit", 100)?
            .set_default("logger.level", "info")
    }
}
