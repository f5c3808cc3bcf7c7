use crate::error::ConfigError;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_WINDOW_CAPACITY: usize = 2;
pub const DEFAULT_MAX_CLIENTS: usize = 32;
pub const DEFAULT_OFFLINE_SECS: u64 = 30;
pub const DEFAULT_EVALUATE_SECS: u64 = 5;
pub const DEFAULT_REFRESH_SECS: u64 = 10;

/// What to do with an unknown client when every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FullPolicy {
    /// Drop the datagram; the client never shows up until a slot is cleared.
    #[default]
    Drop,
    /// Reuse the slot of the client whose latest record is oldest.
    EvictLeastRecent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub window_capacity: usize,
    pub max_clients: usize,
    pub offline_threshold_secs: u64,
    pub full_policy: FullPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            max_clients: DEFAULT_MAX_CLIENTS,
            offline_threshold_secs: DEFAULT_OFFLINE_SECS,
            full_policy: FullPolicy::Drop,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::Zero("window capacity"));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Zero("max clients"));
        }
        if self.offline_threshold_secs == 0 {
            return Err(ConfigError::Zero("offline threshold"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub registry: RegistryConfig,
    pub evaluate_interval: Duration,
    pub refresh_interval: Duration,
    pub pin_cores: bool,
    pub latency_stats: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            registry: RegistryConfig::default(),
            evaluate_interval: Duration::from_secs(DEFAULT_EVALUATE_SECS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            pin_cores: false,
            latency_stats: false,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry.validate()?;
        if self.evaluate_interval.is_zero() {
            return Err(ConfigError::Zero("evaluate interval"));
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Zero("refresh interval"));
        }
        if self.evaluate_interval.as_secs_f64() >= self.registry.offline_threshold_secs as f64 {
            return Err(ConfigError::EvaluateInterval {
                interval: self.evaluate_interval.as_secs(),
                threshold: self.registry.offline_threshold_secs,
            });
        }
        Ok(())
    }

    /// Overlays whatever the file sets on top of `self`.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(bind) = file.bind {
            self.bind = bind;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(capacity) = file.window_capacity {
            self.registry.window_capacity = capacity;
        }
        if let Some(max) = file.max_clients {
            self.registry.max_clients = max;
        }
        if let Some(secs) = file.offline_threshold_secs {
            self.registry.offline_threshold_secs = secs;
        }
        if let Some(policy) = file.full_policy {
            self.registry.full_policy = policy;
        }
        if let Some(secs) = file.evaluate_interval_secs {
            self.evaluate_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.refresh_interval_secs {
            self.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(pin) = file.pin_cores {
            self.pin_cores = pin;
        }
        if let Some(stats) = file.latency_stats {
            self.latency_stats = stats;
        }
    }
}

/// Optional JSON config; every key may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub window_capacity: Option<usize>,
    pub max_clients: Option<usize>,
    pub offline_threshold_secs: Option<u64>,
    pub full_policy: Option<FullPolicy>,
    pub evaluate_interval_secs: Option<u64>,
    pub refresh_interval_secs: Option<u64>,
    pub pin_cores: Option<bool>,
    pub latency_stats: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.registry.window_capacity, 2);
        assert_eq!(config.registry.max_clients, 32);
        assert_eq!(config.registry.offline_threshold_secs, 30);
        assert_eq!(config.registry.full_policy, FullPolicy::Drop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_values() {
        let mut config = ServerConfig::default();
        config.registry.window_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("window capacity"))
        ));

        let mut config = ServerConfig::default();
        config.registry.max_clients = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_evaluate_interval_must_be_shorter_than_threshold() {
        let mut config = ServerConfig::default();
        config.evaluate_interval = Duration::from_secs(30);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EvaluateInterval {
                interval: 30,
                threshold: 30
            })
        ));
    }

    #[test]
    fn test_file_overlay() {
        let file = ConfigFile::parse(
            r#"{ "port": 6000, "window_capacity": 8, "full_policy": "evict-least-recent" }"#,
        )
        .unwrap();
        let mut config = ServerConfig::default();
        config.apply_file(&file);
        assert_eq!(config.port, 6000);
        assert_eq!(config.registry.window_capacity, 8);
        assert_eq!(config.registry.full_policy, FullPolicy::EvictLeastRecent);
        assert_eq!(config.registry.max_clients, 32);
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        assert!(ConfigFile::parse(r#"{ "prot": 1 }"#).is_err());
        assert_eq!(ConfigFile::parse("{}").unwrap(), ConfigFile::default());
    }
}
