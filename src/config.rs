//! Node Configuration
//!
//! Provides functionality for:
//! - Loading configuration from YAML
//! - Default values for everything optional
//! - Validation before startup

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::NexaError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Explicit listen address, e.g. `10.0.0.5:7000` or `:7000`
    #[serde(default)]
    pub bind_address: Option<String>,
    /// Network interface whose first IPv4 address the node binds to
    #[serde(default)]
    pub bind_interface: Option<String>,
    /// Address of a node in the cluster to join
    #[serde(default)]
    pub join_address: Option<String>,
    /// UDP multicast group used to discover a cluster
    #[serde(default)]
    pub discover_multicast_address: Option<String>,
    /// Working directory of this node instance
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Upper bound on the explicit join call; unbounded when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// How often the node announces itself on the multicast group
    #[serde(default = "default_announce_interval")]
    pub announce_interval_ms: u64,
    /// How long startup waits for the first discovered peer; 0 never waits
    #[serde(default)]
    pub startup_wait_ms: u64,
    /// Multicast TTL of announcements
    #[serde(default = "default_multicast_ttl")]
    pub ttl: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write JSON logs to a daily file under `<work_dir>/logs`
    #[serde(default)]
    pub file: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            bind_interface: None,
            join_address: None,
            discover_multicast_address: None,
            work_dir: default_work_dir(),
            join: JoinConfig::default(),
            discovery: DiscoveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce_interval_ms: default_announce_interval(),
            startup_wait_ms: 0,
            ttl: default_multicast_ttl(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
        }
    }
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join(format!("nexa-P{:04}", std::process::id()))
}

fn default_announce_interval() -> u64 {
    1000
}

fn default_multicast_ttl() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl JoinConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl DiscoveryConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn startup_wait(&self) -> Option<Duration> {
        (self.startup_wait_ms > 0).then(|| Duration::from_millis(self.startup_wait_ms))
    }
}

impl NodeConfig {
    /// Loads the given file, or the first config found in the usual places,
    /// or the defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self, NexaError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        for path in Self::search_paths() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("nexa-node.yml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("nexa/node.yml"));
        }
        paths.push(PathBuf::from("/etc/nexa/node.yml"));
        paths
    }

    pub fn load_from_file(path: &Path) -> Result<Self, NexaError> {
        let content = fs::read_to_string(path).map_err(|e| {
            NexaError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            NexaError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    pub fn validate(&self) -> Result<(), NexaError> {
        if self.discovery.announce_interval_ms == 0 {
            return Err(NexaError::Config(
                "discovery.announce_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.join.timeout_ms == Some(0) {
            return Err(NexaError::Config(
                "join.timeout_ms must be greater than zero when set".to_string(),
            ));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(NexaError::Config(format!(
                "unknown log level {:?}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert!(config.bind_address.is_none());
        assert!(config.join_address.is_none());
        assert_eq!(config.discovery.announce_interval(), Duration::from_secs(1));
        assert_eq!(config.discovery.startup_wait(), None);
        assert_eq!(config.join.timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind_interface: eth0\n\
             discover_multicast_address: \"239.0.0.1:9999\"\n\
             discovery:\n  startup_wait_ms: 250\n\
             logging:\n  level: debug"
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bind_interface.as_deref(), Some("eth0"));
        assert_eq!(
            config.discover_multicast_address.as_deref(),
            Some("239.0.0.1:9999")
        );
        assert_eq!(
            config.discovery.startup_wait(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.discovery.announce_interval_ms, 1000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = NodeConfig::load(Some(&dir.path().join("absent.yml")));
        assert!(matches!(result, Err(NexaError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = NodeConfig::default();
        config.discovery.announce_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
