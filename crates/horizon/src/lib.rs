//! # Horizon Replication Server - Main Entry Point
//!
//! Entity replication server: accepts TCP connections and keeps each peer's
//! view of the world consistent through a per-connection replication window.
//! This entry point handles CLI parsing, configuration loading, and
//! application lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! horizon
//!
//! # Specify custom configuration
//! horizon --config production.toml
//!
//! # Override specific settings
//! horizon --bind 0.0.0.0:8080 --log-level debug
//!
//! # JSON logging for production
//! horizon --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! The server handles graceful shutdown on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;

/// Main entry point for the Horizon server.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime (including a
///   listening address that is already in use)
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments first
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let mut log_settings = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default()
        .logging;
    if let Some(level) = &args.log_level {
        log_settings.level = level.clone();
    }

    // Setup logging before anything else
    if let Err(e) = logging::setup_logging(&log_settings, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    // Create and run application
    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{AppConfig, LoggingSettings, ServerSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let server_config = config
            .to_server_config()
            .expect("Default config should convert to ServerConfig");
        assert_eq!(server_config.max_connections, 1000);
        assert_eq!(server_config.replication.max_remote_entities_pending_creation, 100);
    }

    #[tokio::test]
    async fn test_application_applies_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("config.toml"),
            bind_address: Some("127.0.0.1:0".to_string()),
            log_level: Some("debug".to_string()),
            json_logs: true,
        };

        let app = Application::new(args.clone()).await.unwrap();
        assert!(args.config_path.exists());
        drop(app);
    }

    #[tokio::test]
    async fn test_application_rejects_invalid_override() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("config.toml"),
            bind_address: Some("nowhere".to_string()),
            log_level: None,
            json_logs: false,
        };

        assert!(Application::new(args).await.is_err());
    }
}
