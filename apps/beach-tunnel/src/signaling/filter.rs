use super::HandshakeMessage;
use crate::identity::PeerIdentity;

/// Verdict of the dispatch head filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Our own message echoed back by the relay.
    SelfEcho,
    /// Addressed to some other peer.
    Misaddressed,
}

/// First stage of every dispatch loop. Nothing downstream re-checks
/// sender or recipient.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    local: PeerIdentity,
}

impl MessageFilter {
    pub fn new(local: PeerIdentity) -> Self {
        Self { local }
    }

    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    pub fn admit(&self, message: &HandshakeMessage) -> Admission {
        if message.sender == self.local {
            return Admission::SelfEcho;
        }
        match &message.to {
            Some(to) if !to.is_empty() && *to != self.local => Admission::Misaddressed,
            _ => Admission::Accept,
        }
    }
}
