//! Configuration files of the two node roles.
//!
//! Each role reads one TOML file. A missing file is created with defaults
//! so a fresh checkout can be started without preparing anything.

use channel_server::ChannelConfig;
use cluster_protocol::AccountRecord;
use registry_server::RegistryConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Could not render default configuration: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_format: false,
        }
    }
}

impl LoggingSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LEVELS.contains(&self.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {VALID_LEVELS:?}",
                self.level
            )));
        }
        Ok(())
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// `registry.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryAppConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Seeds the in-memory account store
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
}

impl RegistryAppConfig {
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_or_create(path).await
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.password.is_empty() {
            return Err(ConfigError::Invalid("Registry password cannot be empty".to_string()));
        }
        if self.registry.backlog <= 0 {
            return Err(ConfigError::Invalid("Listen backlog must be positive".to_string()));
        }
        validate_accounts(&self.accounts)?;
        self.logging.validate()
    }
}

/// `channel.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelAppConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Seeds the in-memory account store
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
}

impl ChannelAppConfig {
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_or_create(path).await
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let channel = &self.channel;

        for (field, value) in [("server_group", &channel.server_group), ("node_name", &channel.node_name)] {
            if value.is_empty() || value.contains('/') || value.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be a single word without '/': '{value}'"
                )));
            }
        }
        if channel.max_users <= 0 {
            return Err(ConfigError::Invalid("max_users must be positive".to_string()));
        }
        if channel.bind_address.port() == 0 {
            return Err(ConfigError::Invalid(
                "Client port must be fixed, it is advertised to the registry".to_string(),
            ));
        }
        let registry_ok = match channel.registry_address.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        };
        if !registry_ok {
            return Err(ConfigError::Invalid(format!(
                "Invalid registry address: {}",
                channel.registry_address
            )));
        }
        if channel.registry_password.is_empty() {
            return Err(ConfigError::Invalid("Registry password cannot be empty".to_string()));
        }
        if channel.heartbeat_interval_secs == 0 || channel.reconnect_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "Heartbeat and reconnect intervals must be at least one second".to_string(),
            ));
        }

        let commands = &channel.commands;
        if commands.prefix.is_empty() || commands.target_prefix.is_empty() {
            return Err(ConfigError::Invalid("Command prefixes cannot be empty".to_string()));
        }
        if commands.prefix.contains(char::is_whitespace) || commands.target_prefix.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid("Command prefixes cannot contain whitespace".to_string()));
        }
        if commands.prefix == commands.target_prefix {
            return Err(ConfigError::Invalid(
                "Command prefix and target prefix must differ".to_string(),
            ));
        }

        validate_accounts(&self.accounts)?;
        self.logging.validate()
    }
}

fn validate_accounts(accounts: &[AccountRecord]) -> Result<(), ConfigError> {
    if let Some(record) = accounts.iter().find(|record| record.name.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "Account with authority {} has no name",
            record.authority
        )));
    }
    Ok(())
}

async fn load_or_create<T>(path: &Path) -> Result<T, ConfigError>
where
    T: Default + Serialize + DeserializeOwned,
{
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if path.exists() {
        let content = tokio::fs::read_to_string(path).await.map_err(io_error)?;
        return toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        });
    }

    let config = T::default();
    let content = toml::to_string_pretty(&config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    tokio::fs::write(path, content).await.map_err(io_error)?;
    info!("Created default configuration file: {}", path.display());
    Ok(config)
}
