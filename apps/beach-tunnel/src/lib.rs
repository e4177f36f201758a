pub mod bridge;
pub mod config;
pub mod dialer;
pub mod error;
pub mod identity;
pub mod listener;
pub mod negotiator;
pub mod registry;
pub mod signaling;
pub mod telemetry;
pub mod transport;

pub use config::TunnelConfig;
pub use dialer::Dialer;
pub use error::{SignalError, TunnelError};
pub use identity::{PeerIdentity, RendezvousKey};
pub use listener::Listener;
