//! Configuration module
//!
//! Handles loading and saving the Droplink node configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::EngineConfig;
use crate::protocol::DEFAULT_PORT;
use crate::sensor::Calibration;
use crate::transport::TlsSettings;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Security settings
    #[serde(default)]
    pub security: SecurityConfig,

    /// Measurement settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Node identifier (defaults to the hostname)
    pub node_id: Option<String>,
    /// Role announced to the controller at registration
    #[serde(default = "default_role")]
    pub role: String,
    /// Description announced alongside the role
    #[serde(default = "default_description")]
    pub description: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

fn default_role() -> String {
    "water".to_string()
}

fn default_description() -> String {
    "source".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            role: default_role(),
            description: default_description(),
            verbose: false,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Controller to connect to, as host:port
    #[serde(default = "default_controller_addr")]
    pub controller_addr: String,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// How long an exchange waits for its acknowledgement, in seconds
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
}

fn default_controller_addr() -> String {
    format!("localhost:{DEFAULT_PORT}")
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_ack_timeout() -> u64 {
    30
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            controller_addr: default_controller_addr(),
            connect_timeout_ms: default_connect_timeout(),
            ack_timeout_secs: default_ack_timeout(),
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Only controllers signed with this CA are accepted
    #[serde(default = "default_ca_cert")]
    pub ca_cert: PathBuf,
    /// Client certificate presented to the controller
    #[serde(default = "default_certificate")]
    pub certificate: PathBuf,
    /// Client private key
    #[serde(default = "default_key")]
    pub key: PathBuf,
}

fn default_ca_cert() -> PathBuf {
    PathBuf::from("ca.crt")
}

fn default_certificate() -> PathBuf {
    PathBuf::from("client.crt")
}

fn default_key() -> PathBuf {
    PathBuf::from("client.key")
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            ca_cert: default_ca_cert(),
            certificate: default_certificate(),
            key: default_key(),
        }
    }
}

/// Measurement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Name under which the level is reported
    #[serde(default = "default_metric_name")]
    pub name: String,
    /// Delay between reports, in seconds
    #[serde(default = "default_metric_interval")]
    pub interval_secs: u64,
    /// Sensor-to-surface distance when the barrel is full, in cm
    #[serde(default = "default_offset_cm")]
    pub offset_cm: f64,
    /// Additional distance to the surface when empty, in cm
    #[serde(default = "default_span_cm")]
    pub span_cm: f64,
}

fn default_metric_name() -> String {
    "level".to_string()
}

fn default_metric_interval() -> u64 {
    10
}

fn default_offset_cm() -> f64 {
    5.0
}

fn default_span_cm() -> f64 {
    67.0
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            name: default_metric_name(),
            interval_secs: default_metric_interval(),
            offset_cm: default_offset_cm(),
            span_cm: default_span_cm(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("droplink/config.toml")),
            Some(PathBuf::from("./droplink.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the node ID, falling back to the hostname
    pub fn node_id(&self) -> String {
        self.general.node_id.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "droplink-node".to_string())
        })
    }

    /// Certificate material for the controller connection
    pub fn tls_settings(&self) -> TlsSettings {
        TlsSettings {
            ca_cert: self.security.ca_cert.clone(),
            certificate: self.security.certificate.clone(),
            key: self.security.key.clone(),
        }
    }

    /// Engine tunables derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            role: self.general.role.clone(),
            description: self.general.description.clone(),
            metric_name: self.metrics.name.clone(),
            metric_interval: Duration::from_secs(self.metrics.interval_secs),
            ack_timeout: Duration::from_secs(self.network.ack_timeout_secs),
        }
    }

    /// Sensor calibration derived from this configuration
    pub fn calibration(&self) -> Calibration {
        Calibration {
            offset_cm: self.metrics.offset_cm,
            span_cm: self.metrics.span_cm,
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> String {
    let config = Config {
        general: GeneralConfig {
            node_id: Some("barrel-pi".to_string()),
            ..Default::default()
        },
        network: NetworkConfig {
            controller_addr: "drops.example.net:19406".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    toml::to_string_pretty(&config).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.controller_addr, "localhost:19406");
        assert_eq!(config.general.role, "water");
        assert_eq!(config.metrics.interval_secs, 10);
    }

    #[test]
    fn test_save_and_load() {
        let config = Config::default();
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.network.ack_timeout_secs, config.network.ack_timeout_secs);
        assert_eq!(loaded.metrics.name, config.metrics.name);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = Config::load(Path::new("/nonexistent/droplink.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.general.node_id.as_deref(), Some("barrel-pi"));
        assert_eq!(parsed.network.controller_addr, "drops.example.net:19406");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[metrics]\ninterval_secs = 60\n").unwrap();
        assert_eq!(parsed.metrics.interval_secs, 60);
        assert_eq!(parsed.metrics.name, "level");
        assert_eq!(parsed.network.controller_addr, "localhost:19406");
    }

    #[test]
    fn test_engine_config_conversion() {
        let config = Config::default();
        let engine = config.engine_config();
        assert_eq!(engine.metric_interval, Duration::from_secs(10));
        assert_eq!(engine.ack_timeout, Duration::from_secs(30));
    }
}
