//! Configuration management for the fleet control plane.
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence)
//! 2. Environment variables (FLEETOPS_* prefix)
//! 3. fleetops.local.toml (gitignored, local overrides)
//! 4. fleetops.toml (git-tracked, project config)
//! 5. ~/.config/fleetops/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Top-level fleet control plane configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub project: ProjectConfig,
    pub server: ServerConfig,
    pub executor: ExecutorConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "fleetops-project".to_string(),
        }
    }
}

/// gRPC service shell settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub state_dir: PathBuf,
    pub subscriber_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7443".to_string(),
            state_dir: PathBuf::from(".fleetops/state"),
            subscriber_capacity: 256,
        }
    }
}

/// Retry/backoff defaults handed to `fleetops_executor::RetryConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub step_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 30_000,
            step_timeout_secs: 600,
        }
    }
}

impl ExecutorConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

/// Which [`fleetops_provider::Provider`] the node binary wires in, and its
/// fake-specific knobs for non-production runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Fake,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    Fake,
}

impl FleetConfig {
    /// Load configuration from default locations.
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific project directory.
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Resolve relative paths to absolute, against `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.server.state_dir.is_relative() {
            self.server.state_dir = base.join(&self.server.state_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = FleetConfig::default();
        assert_eq!(config.server.bind_address, "127.0.0.1:7443");
        assert_eq!(config.executor.max_attempts, 5);
        assert_eq!(config.provider.kind, ProviderKind::Fake);
    }

    #[test]
    fn path_resolution() {
        let mut config = FleetConfig::default();
        config.resolve_paths("/home/user/project");

        assert_eq!(config.server.state_dir, PathBuf::from("/home/user/project/.fleetops/state"));
    }

    #[test]
    fn executor_durations_match_their_millisecond_fields() {
        let config = ExecutorConfig::default();
        assert_eq!(config.base_delay(), Duration::from_millis(250));
        assert_eq!(config.step_timeout(), Duration::from_secs(600));
    }
}
