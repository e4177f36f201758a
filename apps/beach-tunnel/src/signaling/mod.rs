//! Handshake signaling over the rendezvous relay.

pub mod filter;
pub mod message;
pub mod relay;
pub mod transport;

use serde::{Deserialize, Serialize};

pub use filter::{Admission, MessageFilter};
pub use message::{HandshakeMessage, HandshakePayload};
pub use relay::{HttpRelay, PullOutcome, RelayClient};
pub use transport::{PullStream, RetryBackoff, SignalSink, SignalingTransport};

/// Relay envelope, as stored in a mailbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectInfo {
    pub source: String,
    pub sdp: String,
}

impl ConnectInfo {
    pub fn is_complete(&self) -> bool {
        !self.source.is_empty() && !self.sdp.is_empty()
    }
}
