//! Configuration management for the Horizon replication server.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files and command-line arguments.

use game_server::{ServerConfig, WindowKind, WindowSettings, DEFAULT_SEND_BUFFER_LIMIT};
use horizon_replication::ReplicationSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Default tick interval for serde deserialization
fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_max_connections() -> usize {
    1000
}

fn default_accept_poll_interval() -> u64 {
    10
}

fn default_max_send_buffer_bytes() -> usize {
    DEFAULT_SEND_BUFFER_LIMIT
}

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure that encompasses all server settings
/// including networking, replication tuning and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Admission cap, removal grace period and orphaned RPC timeout
    #[serde(default)]
    pub replication: ReplicationSettings,
    /// Replication window given to every accepted connection
    #[serde(default)]
    pub window: WindowSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls network binding, connection limits and tick timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Server tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Sleep between polls of the accept thread, in milliseconds
    #[serde(default = "default_accept_poll_interval")]
    pub accept_poll_interval_ms: u64,
    /// Unsent bytes per connection above which replication to it is paused
    #[serde(default = "default_max_send_buffer_bytes")]
    pub max_send_buffer_bytes: usize,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:8080".to_string(),
                max_connections: default_max_connections(),
                tick_interval_ms: default_tick_interval(),
                accept_poll_interval_ms: default_accept_poll_interval(),
                max_send_buffer_bytes: default_max_send_buffer_bytes(),
            },
            replication: ReplicationSettings::default(),
            window: WindowSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to a game server configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_connections: self.server.max_connections,
            tick_interval_ms: self.server.tick_interval_ms,
            accept_poll_interval_ms: self.server.accept_poll_interval_ms,
            max_send_buffer_bytes: self.server.max_send_buffer_bytes,
            replication: self.replication.clone(),
            window: self.window.clone(),
        })
    }

    /// Validates the configuration settings.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error message describing
    /// the first validation failure found.
    pub fn validate(&self) -> Result<(), String> {
        // Validate bind address
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.server.tick_interval_ms == 0 {
            return Err("server.tick_interval_ms must be greater than 0".to_string());
        }

        if self.server.max_connections == 0 {
            return Err("server.max_connections must be greater than 0".to_string());
        }

        if self.server.max_send_buffer_bytes == 0 {
            return Err("server.max_send_buffer_bytes must be greater than 0".to_string());
        }

        if self.replication.max_remote_entities_pending_creation == 0 {
            return Err(
                "replication.max_remote_entities_pending_creation must be greater than 0".to_string(),
            );
        }

        if self.window.kind == WindowKind::Proximity && !(self.window.radius > 0.0) {
            return Err(format!(
                "window.radius must be a positive number, got {}",
                self.window.radius
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.tick_interval_ms, 50);
        assert_eq!(config.server.accept_poll_interval_ms, 10);
        assert_eq!(config.server.max_send_buffer_bytes, 2 * 1024 * 1024);

        assert_eq!(config.replication.max_remote_entities_pending_creation, 100);
        assert_eq!(config.replication.entity_pending_removal_ms, 1000);
        assert_eq!(config.replication.orphaned_rpc_timeout_ms, 1000);

        assert_eq!(config.window.kind, WindowKind::Proximity);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();

        // Should return default config and create the file
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert!(path.exists());

        let written = fs::read_to_string(&path).await.unwrap();
        let reloaded: AppConfig = toml::from_str(&written).unwrap();
        assert_eq!(reloaded.server.tick_interval_ms, config.server.tick_interval_ms);
        assert_eq!(reloaded.window, config.window);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
bind_address = "0.0.0.0:3000"
max_connections = 2000
tick_interval_ms = 33

[replication]
max_remote_entities_pending_creation = 25
entity_pending_removal_ms = 2500

[window]
kind = "null"

[logging]
level = "debug"
json_format = true
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        let path = temp_file.path().to_path_buf();

        let config = AppConfig::load_from_file(&path).await.unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
        assert_eq!(config.server.max_connections, 2000);
        assert_eq!(config.server.tick_interval_ms, 33);
        assert_eq!(config.server.accept_poll_interval_ms, 10);
        assert_eq!(config.replication.max_remote_entities_pending_creation, 25);
        assert_eq!(config.replication.entity_pending_removal_ms, 2500);
        assert_eq!(config.replication.orphaned_rpc_timeout_ms, 1000);
        assert_eq!(config.window.kind, WindowKind::Null);
        assert_eq!(config.window.radius, 500.0);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_malformed_file_fails() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[server\nbind_address = ").unwrap();

        let result = AppConfig::load_from_file(&temp_file.path().to_path_buf()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_to_server_config_conversion() {
        let mut config = AppConfig::default();
        config.server.bind_address = "0.0.0.0:7777".to_string();
        config.replication.entity_pending_removal_ms = 250;

        let server_config = config.to_server_config().unwrap();
        assert_eq!(server_config.bind_address.port(), 7777);
        assert_eq!(server_config.max_connections, 1000);
        assert_eq!(server_config.replication.entity_pending_removal_ms, 250);
        assert_eq!(server_config.window, WindowSettings::default());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "not-an-address".to_string();

        let error = config.validate().unwrap_err();
        assert!(error.contains("Invalid bind address"));
        assert!(config.to_server_config().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.server.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.replication.max_remote_entities_pending_creation = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.max_send_buffer_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.window.radius = 0.0;
        assert!(config.validate().is_err());

        config.window.kind = WindowKind::Null;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_log_levels() {
        let mut config = AppConfig::default();
        for level in ["trace", "debug", "info", "warn", "error"] {
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "{level} should be accepted");
        }

        config.logging.level = "verbose".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));
    }

    #[test]
    fn test_serde_deserialization_with_defaults() {
        let toml_content = r#"
[server]
bind_address = "127.0.0.1:8080"

[logging]
level = "info"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();

        // Should use default values for missing fields
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.tick_interval_ms, default_tick_interval());
        assert_eq!(config.replication, ReplicationSettings::default());
        assert_eq!(config.window, WindowSettings::default());
        assert!(!config.logging.json_format);
    }
}
