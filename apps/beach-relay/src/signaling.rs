use serde::{Deserialize, Serialize};

/// Handshake payload carried through a mailbox. `source` names the pushing
/// peer; `sdp` is opaque to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectInfo {
    pub source: String,
    pub sdp: String,
}
