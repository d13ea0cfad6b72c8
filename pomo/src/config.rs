use anyhow::{Context, Result};
use directories::ProjectDirs;
use pomo_ipc::DisplayMode;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionPlan;

pub const MIN_POLL_INTERVAL_MS: u64 = 20;
pub const MAX_POLL_INTERVAL_MS: u64 = 200;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("iterations must be at least 1")]
    NoIterations,
    #[error("work phase must be at least one minute")]
    NoWork,
    #[error("dot interval must be at least one second")]
    ZeroDotInterval,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub viewer: ViewerConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub work_minutes: u64,
    pub break_minutes: u64,
    pub iterations: u32,
    pub display: DisplayMode,
    pub dot_interval: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ViewerConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// How long an ended session is kept around for a viewer to collect it.
    pub linger_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            break_minutes: 5,
            iterations: 4,
            display: DisplayMode::Countdown,
            dot_interval: None,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { linger_secs: 60 }
    }
}

impl SessionConfig {
    pub fn plan(&self) -> Result<SessionPlan, ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::NoIterations);
        }
        if self.work_minutes == 0 {
            return Err(ConfigError::NoWork);
        }
        if self.dot_interval == Some(0) {
            return Err(ConfigError::ZeroDotInterval);
        }
        Ok(SessionPlan {
            work: Duration::from_secs(self.work_minutes * 60),
            rest: Duration::from_secs(self.break_minutes * 60),
            iterations: self.iterations,
            display: self.display,
            dot_interval: self.dot_interval,
        })
    }
}

impl ViewerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }
}

impl DaemonConfig {
    pub fn linger(&self) -> Duration {
        Duration::from_secs(self.linger_secs)
    }
}

pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "pomo", "pomo").map(|dirs| dirs.config_dir().join("pomo.toml"))
}

pub fn load_config() -> Result<Config> {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Ok(Config::default()),
    }
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {:?}", path))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file at {:?}", path))
}
