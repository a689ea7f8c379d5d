//! Core server implementation.
//!
//! This module contains the game server structure and the tick loop that
//! drives the network interface and replication.

pub mod core;

pub use self::core::GameServer;
