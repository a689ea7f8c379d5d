//! Main application logic and lifecycle management.
//!
//! This module contains the core `Application` struct that orchestrates
//! server startup, monitoring, and shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use game_server::{GameServer, ShutdownState};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main application struct.
///
/// The `Application` struct manages the complete lifecycle of the Horizon server,
/// including configuration loading, server initialization, periodic world
/// statistics, and graceful shutdown handling.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Game server instance
    server: Arc<GameServer>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Initialize game server with configuration
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        // Validate configuration
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        display_banner();

        let server_config = config.to_server_config()?;
        let server = Arc::new(GameServer::new(server_config));

        info!("📂 Config: {}", args.config_path.display());

        Ok(Self { config, server })
    }

    /// Runs the server until a termination signal arrives or it fails to start.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a graceful shutdown, or an error if the server could not
    /// bind its listening socket or stopped unexpectedly.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Horizon Replication Server");
        self.log_configuration_summary();

        let shutdown_state = ShutdownState::new();

        let mut server_handle = {
            let server = self.server.clone();
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move { server.start_with_shutdown_state(shutdown_state).await })
        };

        // Start monitoring task for periodic world statistics
        let monitoring_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    info!(
                        "📊 World Health - {} entities | {} positioned",
                        server.world_state().len(),
                        server.entity_positions().len()
                    );
                }
            })
        };

        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            result = &mut server_handle => {
                monitoring_handle.abort();
                return match result {
                    Ok(Ok(())) => {
                        warn!("Server stopped without a shutdown signal");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        error!("❌ Server error: {}", e);
                        Err(e.into())
                    }
                    Err(e) => Err(e.into()),
                };
            }
            signal = setup_signal_handlers() => {
                signal?;
            }
        }

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        monitoring_handle.abort();
        shutdown_state.initiate_shutdown();

        info!("⏳ Waiting for connections to close...");
        match tokio::time::timeout(tokio::time::Duration::from_secs(8), server_handle).await {
            Ok(Ok(Ok(()))) => info!("✅ Server task completed gracefully"),
            Ok(Ok(Err(e))) => error!("❌ Server error during shutdown: {}", e),
            Ok(Err(e)) => error!("❌ Server task failed: {}", e),
            Err(_) => warn!("⏰ Server task did not complete within timeout"),
        }

        if !shutdown_state.is_shutdown_complete() {
            warn!("Some connections may not have received their final packets");
        }

        info!("📊 Final Statistics:");
        info!("  - Entities in world: {}", self.server.world_state().len());
        info!("✅ Horizon Replication Server shutdown complete");

        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  ⏱️ Tick interval: {}ms", self.config.server.tick_interval_ms);
        info!(
            "  🚦 Admission cap: {} | Removal grace: {}ms | Orphaned RPC timeout: {}ms",
            self.config.replication.max_remote_entities_pending_creation,
            self.config.replication.entity_pending_removal_ms,
            self.config.replication.orphaned_rpc_timeout_ms
        );
        info!(
            "  🔭 Window: {:?} (radius {:.0}, {} sends/tick)",
            self.config.window.kind, self.config.window.radius, self.config.window.max_send_count
        );
    }
}
