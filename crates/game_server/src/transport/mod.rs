//! TCP transport: background accept thread and the per-tick network interface.

pub mod interface;
pub mod listener;

pub use interface::{window_factory_from_settings, NetworkInterface, WindowFactory};
pub use listener::{AcceptedSocket, TransportListener};
