use thiserror::Error;

/// Failures talking to the rendezvous relay. Always transient from the
/// caller's point of view.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("relay request failed: {0}")]
    Http(String),
    #[error("relay returned status {0}")]
    Status(u16),
    #[error("failed to encode handshake message: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalError),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("malformed handshake message: {0}")]
    MalformedMessage(String),
    #[error("local socket error: {0}")]
    LocalResource(#[source] std::io::Error),
    #[error("bridge i/o failed: {0}")]
    Bridge(String),
    #[error("peer transport setup failed: {0}")]
    Transport(String),
    #[error("session closed")]
    Closed,
    #[error("negotiation timed out")]
    Timeout,
}

impl TunnelError {
    pub fn negotiation<E: std::fmt::Display>(err: E) -> Self {
        TunnelError::Negotiation(err.to_string())
    }

    pub fn transport<E: std::fmt::Display>(err: E) -> Self {
        TunnelError::Transport(err.to_string())
    }
}
