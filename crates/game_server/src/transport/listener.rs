//! Background accept loop for listening sockets.

use crate::connection::SocketHandle;
use crate::error::ServerError;
use crossbeam::channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// A socket accepted by the background thread, waiting for the simulation tick.
#[derive(Debug)]
pub struct AcceptedSocket {
    pub stream: TcpStream,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub socket: SocketHandle,
}

/// Owns the listening sockets and the thread that polls them.
///
/// Accepted sockets travel through a single-producer single-consumer channel;
/// the simulation tick takes them with [`drain_accepted`](Self::drain_accepted).
pub struct TransportListener {
    sockets: Arc<DashMap<SocketAddr, TcpListener>>,
    accepted: Receiver<AcceptedSocket>,
    exit: Arc<AtomicBool>,
    last_loop_us: Arc<AtomicU64>,
    max_loop_us: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl TransportListener {
    /// Spawns the `horizon-accept` thread with no sockets to poll yet.
    pub fn start(poll_interval: Duration) -> Result<Self, ServerError> {
        let sockets: Arc<DashMap<SocketAddr, TcpListener>> = Arc::new(DashMap::new());
        let (sender, accepted) = unbounded();
        let exit = Arc::new(AtomicBool::new(false));
        let last_loop_us = Arc::new(AtomicU64::new(0));
        let max_loop_us = Arc::new(AtomicU64::new(0));

        let thread = {
            let sockets = sockets.clone();
            let exit = exit.clone();
            let last_loop_us = last_loop_us.clone();
            let max_loop_us = max_loop_us.clone();
            thread::Builder::new()
                .name("horizon-accept".to_string())
                .spawn(move || {
                    Self::run_loop(sockets, sender, exit, last_loop_us, max_loop_us, poll_interval)
                })
                .map_err(|e| ServerError::Internal(format!("Failed to spawn accept thread: {e}")))?
        };

        debug!("Accept thread started (poll interval: {:?})", poll_interval);

        Ok(Self {
            sockets,
            accepted,
            exit,
            last_loop_us,
            max_loop_us,
            thread: Some(thread),
        })
    }

    fn run_loop(
        sockets: Arc<DashMap<SocketAddr, TcpListener>>,
        sender: Sender<AcceptedSocket>,
        exit: Arc<AtomicBool>,
        last_loop_us: Arc<AtomicU64>,
        max_loop_us: Arc<AtomicU64>,
        poll_interval: Duration,
    ) {
        while !exit.load(Ordering::Acquire) {
            let started = Instant::now();

            for entry in sockets.iter() {
                let local_addr = *entry.key();
                loop {
                    match entry.value().accept() {
                        Ok((stream, remote_addr)) => {
                            trace!("Accepted {} on {}", remote_addr, local_addr);
                            let socket = SocketHandle::of(&stream);
                            let accepted = AcceptedSocket { stream, remote_addr, local_addr, socket };
                            if sender.send(accepted).is_err() {
                                // Consumer is gone; nothing left to deliver to.
                                return;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            warn!("Accept failed on {}: {}", local_addr, e);
                            break;
                        }
                    }
                }
            }

            let elapsed = started.elapsed().as_micros() as u64;
            last_loop_us.store(elapsed, Ordering::Relaxed);
            max_loop_us.fetch_max(elapsed, Ordering::Relaxed);

            thread::sleep(poll_interval);
        }
    }

    /// Opens a non-blocking listening socket on `address`.
    ///
    /// Returns the bound address, which differs from `address` when port 0
    /// was requested.
    pub fn listen(&self, address: SocketAddr) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind(address).map_err(|source| ServerError::Bind { address, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::Bind { address, source })?;
        let bound = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;

        self.sockets.insert(bound, listener);
        info!("👂 Listening on {}", bound);
        Ok(bound)
    }

    /// Closes the listening socket bound to `address`.
    ///
    /// Returns false when nothing was listening there. Sockets already queued
    /// from it are still delivered.
    pub fn stop_listening(&self, address: SocketAddr) -> bool {
        match self.sockets.remove(&address) {
            Some(_) => {
                info!("🔇 Stopped listening on {}", address);
                true
            }
            None => false,
        }
    }

    pub fn listening_addresses(&self) -> Vec<SocketAddr> {
        self.sockets.iter().map(|entry| *entry.key()).collect()
    }

    /// Takes every socket accepted since the last call.
    pub fn drain_accepted(&self) -> Vec<AcceptedSocket> {
        self.accepted.try_iter().collect()
    }

    /// Duration of the most recent accept cycle, in microseconds.
    pub fn last_loop_micros(&self) -> u64 {
        self.last_loop_us.load(Ordering::Relaxed)
    }

    pub fn max_loop_micros(&self) -> u64 {
        self.max_loop_us.load(Ordering::Relaxed)
    }

    /// Stops and joins the accept thread and closes every listening socket.
    pub fn shutdown(&mut self) {
        self.exit.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Accept thread panicked");
            }
            debug!("Accept thread stopped");
        }
        self.sockets.clear();
    }
}

impl Drop for TransportListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}
