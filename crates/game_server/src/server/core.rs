//! Core game server implementation.
//!
//! This module contains the main `GameServer` struct, which owns the shared
//! world state and drives one [`NetworkInterface`] from a fixed-rate tick.

use crate::{
    config::ServerConfig,
    connection::{AllowAllListener, ConnectionListener},
    error::ServerError,
    shutdown::ShutdownState,
    transport::{window_factory_from_settings, NetworkInterface},
};
use horizon_replication::{EntityPositions, PropertyStateCodec};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace};

/// The core game server structure.
///
/// `GameServer` holds the authoritative entity state every connection
/// replicates from, and runs the simulation tick that accepts connections,
/// reads their input, advances replication and writes their output.
///
/// Game logic mutates [`world_state`](Self::world_state) and
/// [`entity_positions`](Self::entity_positions); replication windows and
/// replicators pick the changes up on the next tick.
pub struct GameServer {
    /// Configuration parameters for server behavior
    config: ServerConfig,

    /// Authoritative entity properties shared by every connection
    codec: Arc<PropertyStateCodec>,

    /// Entity positions consulted by proximity windows
    positions: Arc<EntityPositions>,

    /// Authorization hook for new connections
    listener: Arc<dyn ConnectionListener>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,

    /// Address actually bound once the server is listening
    bound_address: watch::Sender<Option<SocketAddr>>,
}

impl GameServer {
    /// Creates a new game server that accepts every connection.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_listener(config, Arc::new(AllowAllListener))
    }

    /// Creates a new game server with a custom connection listener.
    pub fn with_listener(config: ServerConfig, listener: Arc<dyn ConnectionListener>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        let (bound_address, _) = watch::channel(None);

        Self {
            config,
            codec: Arc::new(PropertyStateCodec::new()),
            positions: Arc::new(EntityPositions::new()),
            listener,
            shutdown_sender,
            bound_address,
        }
    }

    /// Starts the game server and runs its tick until [`shutdown`](Self::shutdown).
    ///
    /// # Returns
    ///
    /// `Ok(())` if the server started and stopped cleanly, or a `ServerError`
    /// if the listening socket could not be opened.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_internal(None).await
    }

    /// Starts the game server with graceful shutdown support.
    ///
    /// The tick stops once the shared state reports shutdown initiated; every
    /// connection is then closed with its final removal packets and the state
    /// is marked complete.
    pub async fn start_with_shutdown_state(&self, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        self.start_internal(Some(shutdown_state)).await
    }

    /// Internal method for starting the server with optional shutdown state.
    async fn start_internal(&self, shutdown_state: Option<ShutdownState>) -> Result<(), ServerError> {
        info!("🚀 Starting game server on {}", self.config.bind_address);

        if self.config.tick_interval_ms == 0 {
            return Err(ServerError::Internal("tick_interval_ms must be greater than 0".to_string()));
        }

        let mut interface = NetworkInterface::new(
            Duration::from_millis(self.config.accept_poll_interval_ms),
            self.listener.clone(),
            self.codec.clone(),
            self.config.replication.clone(),
            self.config.max_connections,
        )?;
        interface.set_send_buffer_limit(self.config.max_send_buffer_bytes);
        interface.set_window_factory(window_factory_from_settings(
            &self.config.window,
            self.positions.clone(),
        ));

        let bound = interface.listen(self.config.bind_address)?;
        self.bound_address.send_replace(Some(bound));
        info!("🌐 Accepting connections on {}", bound);
        info!("🕒 Server tick started with interval: {}ms", self.config.tick_interval_ms);

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let mut ticker = interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let started = Instant::now();
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(ref state) = shutdown_state {
                        if state.is_shutdown_initiated() {
                            info!("🛑 Server tick stopping - shutdown initiated");
                            break;
                        }
                    }

                    let now_ms = started.elapsed().as_millis() as u64;
                    interface.update(now_ms);
                    tick_count += 1;

                    if tick_count % 1000 == 0 {
                        debug!(
                            "🕒 Tick {}: {} connection(s), accept loop {}µs (max {}µs)",
                            tick_count,
                            interface.connections().len(),
                            interface.transport().last_loop_micros(),
                            interface.transport().max_loop_micros()
                        );
                    } else {
                        trace!("🕒 Tick {} at {}ms", tick_count, now_ms);
                    }
                }
                _ = shutdown_receiver.recv() => {
                    info!("Internal shutdown signal received");
                    break;
                }
            }
        }

        // Server shutdown cleanup
        info!("🧹 Closing connections...");
        let closed = interface.shutdown();
        info!("✅ Closed {} connection(s) after {} ticks", closed, tick_count);

        if let Some(state) = shutdown_state {
            state.complete_shutdown();
        }

        self.bound_address.send_replace(None);
        info!("Server stopped");
        Ok(())
    }

    /// Requests the tick loop to stop.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down game server...");
        if self.shutdown_sender.send(()).is_err() {
            error!("Shutdown requested but the server is not running");
        }
        Ok(())
    }

    /// Waits until the server is listening and returns the bound address.
    pub async fn wait_until_listening(&self) -> Option<SocketAddr> {
        let mut receiver = self.bound_address.subscribe();
        let address = *receiver.wait_for(Option::is_some).await.ok()?;
        address
    }

    /// Authoritative entity state replicated to every connection.
    pub fn world_state(&self) -> Arc<PropertyStateCodec> {
        self.codec.clone()
    }

    /// Entity positions used by proximity windows.
    pub fn entity_positions(&self) -> Arc<EntityPositions> {
        self.positions.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
