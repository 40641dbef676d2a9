use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How non-participant entities of an instance are split into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Creatures and objects together in one batch per instance.
    #[default]
    ByCategory,
    /// One batch per non-empty cell.
    ByCell,
}

/// Scheduler configuration, usually read from a YAML file at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Threads ticking creatures and objects.
    pub general_pool_size: usize,
    /// Threads ticking participants and running onboarding.
    pub participant_pool_size: usize,
    /// Cadence of the fixed-rate driver.
    pub tick_interval_ms: u64,
    /// Upper bound on the wait for a participant's spawn cell. `None` waits forever.
    pub cell_load_timeout_ms: Option<u64>,
    pub partition: PartitionStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            general_pool_size: cores.saturating_sub(1).max(1),
            participant_pool_size: 2,
            tick_interval_ms: 50,
            cell_load_timeout_ms: Some(30_000),
            partition: PartitionStrategy::ByCategory,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{pool} pool size must be at least 1")]
    InvalidPoolSize { pool: &'static str },
    #[error("tick interval must be at least 1 ms")]
    InvalidTickInterval,
}

impl SchedulerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general_pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize { pool: "general" });
        }
        if self.participant_pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize {
                pool: "participant",
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval);
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn cell_load_timeout(&self) -> Option<Duration> {
        self.cell_load_timeout_ms.map(Duration::from_millis)
    }
}
