//! The peer-transport contract the negotiator drives, and its bindings.

pub mod memory;
pub mod webrtc;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TunnelError;
use crate::negotiator::Role;

/// One reachability candidate as exchanged over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateInit {
    pub candidate: String,
    pub mid: Option<String>,
    pub line_index: Option<u16>,
}

impl CandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            mid: None,
            line_index: None,
        }
    }
}

/// Outbound half of an open peer channel.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send(&self, data: Bytes) -> Result<(), TunnelError>;

    /// Closing more than once is harmless.
    async fn close(&self);
}

/// Chunks buffered between the transport and the bridge before the
/// transport has to wait for the local socket.
pub const INBOUND_QUEUE_DEPTH: usize = 64;

/// A reliable, ordered duplex channel to the remote peer. `inbound` ends
/// when the remote side goes away.
pub struct PeerChannel {
    pub sink: Arc<dyn ChannelSink>,
    pub inbound: mpsc::Receiver<Bytes>,
}

impl fmt::Debug for PeerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerChannel").finish_non_exhaustive()
    }
}

/// Events a link raises on its own, outside any call into it.
#[derive(Debug)]
pub enum LinkEvent {
    Open(PeerChannel),
    Closed,
}

/// One peer connection under negotiation.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Responder: local offer description.
    async fn create_offer(&self) -> Result<String, TunnelError>;

    /// Initiator: applies the remote offer and returns the local answer.
    async fn create_answer(&self, offer: &str) -> Result<String, TunnelError>;

    /// Responder: applies the remote answer.
    async fn set_remote_description(&self, answer: &str) -> Result<(), TunnelError>;

    /// Waits for local gathering to finish and returns everything found.
    async fn gather_candidates(&self) -> Result<Vec<CandidateInit>, TunnelError>;

    async fn add_candidate(&self, candidate: CandidateInit) -> Result<(), TunnelError>;

    async fn close(&self);
}

pub struct PeerSetup {
    pub link: Box<dyn PeerLink>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Factory for fresh peer links.
#[async_trait]
pub trait PeerConnector: Send + Sync + 'static {
    async fn connect(&self, role: Role) -> Result<PeerSetup, TunnelError>;
}
