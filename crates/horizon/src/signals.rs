//! Signal handling for graceful server shutdown.
//!
//! This module provides cross-platform signal handling to allow the server
//! to shut down gracefully when receiving termination signals. The first
//! signal closes every connection with its final removal packets; a second
//! one forces the process to exit.

use tokio::signal;
use tracing::info;

/// Waits for a termination signal and logs it.
///
/// # Platform Support
///
/// * **Unix platforms**: Handles SIGINT and SIGTERM signals
/// * **Windows**: Handles Ctrl+C signal
///
/// # Returns
///
/// `Ok(())` once a shutdown signal is received, or an error if signal
/// handling could not be set up. Coordinating the shutdown itself is left to
/// the caller's `ShutdownState`.
pub async fn setup_signal_handlers() -> Result<(), Box<dyn std::error::Error>> {
    setup_signal_handlers_silent().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    Ok(())
}

/// Waits for a termination signal without logging it.
///
/// Used for the second-signal handler that forces an immediate exit.
pub async fn setup_signal_handlers_silent() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_handlers_wait_for_a_signal() {
        let waited = tokio::time::timeout(Duration::from_millis(50), setup_signal_handlers()).await;
        assert!(waited.is_err(), "no signal was sent, the handler must still be pending");
    }
}
