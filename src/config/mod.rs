//! Configuration management for mongowire

use crate::core::{Connection, ConnectionOptions, HostAddress};
use crate::error::ConnectError;
pub use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main mongowire configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which server or replica set to talk to
    pub server: ServerConfig,
    /// Socket behaviour
    pub connection: ConnectionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server topology configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum ServerConfig {
    #[serde(rename = "single")]
    Single {
        /// Host name or address
        host: String,
        /// Server port
        port: u16,
    },
    #[serde(rename = "replica_set")]
    ReplicaSet {
        /// Required set name; any name is accepted when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Seed members as `host:port`
        seeds: Vec<String>,
    },
}

/// Socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connect timeout in milliseconds; 0 blocks until the OS gives up
    pub connect_timeout_ms: u64,
    /// Per-call read/write timeout in milliseconds; 0 blocks forever
    pub op_timeout_ms: u64,
    /// Documents requested per get-more; 0 lets the server decide
    pub batch_size: i32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (text, compact)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::Single {
                host: "127.0.0.1".to_string(),
                port: crate::core::DEFAULT_PORT,
            },
            connection: ConnectionConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            op_timeout_ms: 30000,
            batch_size: 0,
        }
    }
}

impl ConnectionConfig {
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            connect_timeout: millis(self.connect_timeout_ms),
            op_timeout: millis(self.op_timeout_ms),
            batch_size: self.batch_size,
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.server {
            ServerConfig::Single { host, port } => {
                HostAddress::new(host.as_str(), *port).map_err(|e| {
                    ConfigError::ValidationError(format!("Invalid server address: {}", e))
                })?;
            }
            ServerConfig::ReplicaSet { name, seeds } => {
                if seeds.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "seeds cannot be empty".to_string(),
                    ));
                }

                for seed in seeds {
                    seed.parse::<HostAddress>().map_err(|_| {
                        ConfigError::ValidationError(format!("Invalid seed: {}", seed))
                    })?;
                }

                if matches!(name, Some(name) if name.is_empty()) {
                    return Err(ConfigError::ValidationError(
                        "replica set name cannot be empty".to_string(),
                    ));
                }
            }
        }

        if self.connection.batch_size < 0 {
            return Err(ConfigError::ValidationError(
                "batch_size cannot be negative".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "text" | "compact" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, mode: &str) -> Result<(), ConfigError> {
        let config = match mode {
            "single" => Config::default(),
            "replica_set" => Config {
                server: ServerConfig::ReplicaSet {
                    name: Some("rs0".to_string()),
                    seeds: vec![
                        "10.0.1.10:27017".to_string(),
                        "10.0.1.11:27017".to_string(),
                        "10.0.1.12:27017".to_string(),
                    ],
                },
                ..Default::default()
            },
            _ => {
                return Err(ConfigError::ValidationError(
                    "Mode must be 'single' or 'replica_set'".to_string(),
                ))
            }
        };

        config.save_to_file(path)
    }
}

impl Connection {
    /// Build a disconnected connection in the mode `config` describes.
    /// Call [`Connection::open`] to connect it.
    pub fn from_config(config: &Config) -> Result<Self, ConnectError> {
        let options = config.connection.options();
        match &config.server {
            ServerConfig::Single { host, port } => {
                let mut conn = Connection::with_options(options);
                conn.primary = Some(HostAddress::new(host.as_str(), *port)?);
                Ok(conn)
            }
            ServerConfig::ReplicaSet { name, seeds } => {
                let mut conn = Connection::replica_set_with_options(name.as_deref(), options);
                for seed in seeds {
                    let addr: HostAddress = seed.parse()?;
                    conn.add_seed(addr.host(), addr.port())?;
                }
                Ok(conn)
            }
        }
    }
}
