use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shared secret naming the mailbox where a dialer finds its listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RendezvousKey(String);

impl RendezvousKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Fresh random key, suitable for `newkey`.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The listener answers under the rendezvous key itself, so its mailbox
    /// and its identity coincide.
    pub fn listener_identity(&self) -> PeerIdentity {
        PeerIdentity(self.0.clone())
    }
}

impl fmt::Display for RendezvousKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One participant in a rendezvous. Doubles as that participant's mailbox
/// key on the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
