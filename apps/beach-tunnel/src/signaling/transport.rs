use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::relay::{PullOutcome, RelayClient};
use super::{ConnectInfo, HandshakeMessage};
use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::identity::RendezvousKey;

const PUSH_ATTEMPTS: u32 = 3;

/// Outbound half of signaling as seen by a negotiating session.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send(&self, message: HandshakeMessage) -> Result<(), TunnelError>;
}

/// Linear backoff for relay failures: the n-th consecutive failure waits
/// `step * min(n, max_attempts)`.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    step: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl RetryBackoff {
    pub fn new(step: Duration, max_attempts: u32) -> Self {
        Self {
            step,
            max_attempts: max_attempts.max(1),
            attempt: 0,
        }
    }

    pub fn from_config(config: &TunnelConfig) -> Self {
        Self::new(config.backoff_step, config.backoff_max_attempts)
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.step * self.attempt.min(self.max_attempts)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Push and long-poll access to the rendezvous relay.
#[derive(Clone)]
pub struct SignalingTransport {
    relay: Arc<dyn RelayClient>,
    rendezvous: RendezvousKey,
    backoff: RetryBackoff,
    cancel: CancellationToken,
}

impl SignalingTransport {
    pub fn new(relay: Arc<dyn RelayClient>, rendezvous: RendezvousKey, config: &TunnelConfig) -> Self {
        Self {
            relay,
            rendezvous,
            backoff: RetryBackoff::from_config(config),
            cancel: CancellationToken::new(),
        }
    }

    /// A copy whose pushes give up with `Closed` as soon as `cancel` fires,
    /// whether mid-request or waiting to retry.
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn rendezvous(&self) -> &RendezvousKey {
        &self.rendezvous
    }

    /// Mailbox a message is delivered to: its recipient, or the rendezvous
    /// key when it is a broadcast.
    pub fn destination<'a>(&'a self, message: &'a HandshakeMessage) -> &'a str {
        match &message.to {
            Some(to) if !to.is_empty() => to.as_str(),
            _ => self.rendezvous.as_str(),
        }
    }

    pub async fn push(&self, message: &HandshakeMessage) -> Result<(), TunnelError> {
        let info = message.encode()?;
        let key = self.destination(message);
        let mut backoff = self.backoff.clone();
        loop {
            let pushed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TunnelError::Closed),
                pushed = self.relay.push(key, &info) => pushed,
            };
            match pushed {
                Ok(()) => {
                    tracing::debug!(
                        target = "beach_tunnel::signaling",
                        key,
                        kind = message.payload.kind(),
                        "pushed handshake message"
                    );
                    return Ok(());
                }
                Err(err) if backoff.attempt() + 1 < PUSH_ATTEMPTS => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        target = "beach_tunnel::signaling",
                        key,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "relay push failed"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(TunnelError::Closed),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Infinite stream of payloads arriving in mailbox `key`. It ends only
    /// when `cancel` fires.
    pub fn pull(&self, key: impl Into<String>, cancel: CancellationToken) -> PullStream {
        let mut backoff = self.backoff.clone();
        backoff.reset();
        PullStream {
            relay: Arc::clone(&self.relay),
            key: key.into(),
            cancel,
            backoff,
        }
    }
}

#[async_trait]
impl SignalSink for SignalingTransport {
    async fn send(&self, message: HandshakeMessage) -> Result<(), TunnelError> {
        self.push(&message).await
    }
}

pub struct PullStream {
    relay: Arc<dyn RelayClient>,
    key: String,
    cancel: CancellationToken,
    backoff: RetryBackoff,
}

impl PullStream {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Consecutive relay failures since the last answered poll.
    pub fn failures(&self) -> u32 {
        self.backoff.attempt()
    }

    pub async fn next(&mut self) -> Option<ConnectInfo> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                outcome = self.relay.pull_once(&self.key) => outcome,
            };
            match outcome {
                Ok(PullOutcome::Payload(info)) => {
                    self.backoff.reset();
                    return Some(info);
                }
                Ok(PullOutcome::Empty) => {
                    self.backoff.reset();
                    tokio::task::yield_now().await;
                }
                Ok(PullOutcome::Malformed(reason)) => {
                    self.backoff.reset();
                    tracing::debug!(
                        target = "beach_tunnel::signaling",
                        key = %self.key,
                        reason,
                        "skipping malformed relay payload"
                    );
                }
                Err(err) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        target = "beach_tunnel::signaling",
                        key = %self.key,
                        error = %err,
                        attempt = self.backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "relay pull failed"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Like [`next`](Self::next), decoding the envelope and dropping bodies
    /// that don't parse.
    pub async fn next_message(&mut self) -> Option<HandshakeMessage> {
        loop {
            let info = self.next().await?;
            match HandshakeMessage::decode(&info) {
                Ok(message) => return Some(message),
                Err(err) => tracing::debug!(
                    target = "beach_tunnel::signaling",
                    key = %self.key,
                    source = %info.source,
                    error = %err,
                    "dropping undecodable handshake message"
                ),
            }
        }
    }
}
