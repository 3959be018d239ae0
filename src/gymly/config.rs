use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::Level as TracingLevel;

use super::BoxResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Level(pub TracingLevel);

impl Level {
    pub const TRACE: TracingLevel = TracingLevel::TRACE;
    pub const DEBUG: TracingLevel = TracingLevel::DEBUG;
    pub const INFO: TracingLevel = TracingLevel::INFO;
    pub const WARN: TracingLevel = TracingLevel::WARN;
    pub const ERROR: TracingLevel = TracingLevel::ERROR;
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub tls: TlsConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub enable: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// humantime duration, e.g. "7d" or "12h"
    pub token_lifetime: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageConfig {
    /// Base URL of an S3-compatible endpoint. Uploads are disabled when unset.
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    /// Where uploaded objects are publicly reachable, if not under `endpoint`.
    pub public_base_url: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_lifetime: "7d".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            run_migrations: true,
        }
    }
}

impl AuthConfig {
    pub fn token_lifetime(&self) -> BoxResult<Duration> {
        Ok(humantime::parse_duration(&self.token_lifetime)?)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Self::TRACE => write!(f, "TRACE"),
            Self::DEBUG => write!(f, "DEBUG"),
            Self::INFO => write!(f, "INFO"),
            Self::WARN => write!(f, "WARN"),
            Self::ERROR => write!(f, "ERROR"),
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Self(Self::TRACE)),
            "DEBUG" => Ok(Self(Self::DEBUG)),
            "INFO" => Ok(Self(Self::INFO)),
            "WARN" => Ok(Self(Self::WARN)),
            "ERROR" => Ok(Self(Self::ERROR)),
            _ => Err(format!("invalid log level: {s}")),
        }
    }
}

impl From<Level> for tracing::Level {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tls: TlsConfig {
                cert: None,
                key: None,
                enable: false,
            },
            network: NetworkConfig {
                ip: "0.0.0.0".to_string(),
                port: 3000,
            },
            logging: LoggingConfig {
                level: "INFO".to_string(),
            },
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> BoxResult<Self> {
        let config = match fs::read_to_string(path) {
            Ok(config) => config,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    let config = Config::default();
                    config.write(path)?;
                    return Ok(config);
                }
                return Err(e.into());
            }
        };

        let config: Config = toml::from_str(&config)?;

        Ok(config)
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    pub fn write(&self, path: &Path) -> BoxResult<()> {
        let config = toml::to_string_pretty(self)?;
        fs::write(path, config)?;
        Ok(())
    }
}

pub fn string_to_ip(ip: &str) -> Result<IpAddr, String> {
    ip.parse::<IpAddr>()
        .map_err(|_| format!("invalid ip address: {ip:?}"))
}
