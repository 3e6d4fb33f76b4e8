use crate::sweep::SweepConfig;
use ringlog::Level;
use serde::Deserialize;
use thiserror::Error;

use std::path::Path;
use std::str::FromStr;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// File configuration for the `analyze` command.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    log: Log,
    analysis: SweepConfig,
}

impl Config {
    pub fn load(path: &dyn AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        self.analysis.check().map_err(ConfigError::Invalid)
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn analysis(&self) -> &SweepConfig {
        &self.analysis
    }
}

/// The `[log]` section.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Log {
    #[serde(with = "LevelDef")]
    #[serde(default = "log_level")]
    level: Level,
}

impl Default for Log {
    fn default() -> Self {
        Self { level: log_level() }
    }
}

impl Log {
    pub fn level(&self) -> Level {
        self.level
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
#[serde(remote = "Level")]
enum LevelDef {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn log_level() -> Level {
    Level::Info
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.check()?;
        Ok(config)
    }
}
