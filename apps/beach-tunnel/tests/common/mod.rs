#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use beach_relay::signaling::ConnectInfo as RelayEnvelope;
use beach_relay::storage::MailboxStore;
use beach_tunnel::TunnelConfig;
use beach_tunnel::error::SignalError;
use beach_tunnel::signaling::{ConnectInfo, HandshakeMessage, PullOutcome, RelayClient};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Relay client backed directly by the relay's mailbox store.
pub struct InProcessRelay {
    store: MailboxStore,
    wait: Duration,
    pushes: Mutex<Vec<(String, HandshakeMessage)>>,
}

impl InProcessRelay {
    pub fn new(wait: Duration) -> Self {
        Self::with_capacity(1, wait)
    }

    pub fn with_capacity(capacity: usize, wait: Duration) -> Self {
        Self {
            store: MailboxStore::new(capacity),
            wait,
            pushes: Mutex::new(Vec::new()),
        }
    }

    /// Decoded messages pushed to mailbox `key`, oldest first.
    pub fn pushed_to(&self, key: &str) -> Vec<HandshakeMessage> {
        self.pushes
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn all_pushed(&self) -> Vec<HandshakeMessage> {
        self.pushes.lock().iter().map(|(_, message)| message.clone()).collect()
    }

    /// Pushes a message the way a peer would, bypassing any negotiator.
    pub fn inject(&self, key: &str, message: &HandshakeMessage) {
        let info = message.encode().expect("encode");
        self.store.push(
            key,
            RelayEnvelope {
                source: info.source,
                sdp: info.sdp,
            },
        );
    }

    pub async fn take(&self, key: &str) -> Option<HandshakeMessage> {
        let envelope = self.store.pull(key, self.wait).await?;
        HandshakeMessage::decode(&ConnectInfo {
            source: envelope.source,
            sdp: envelope.sdp,
        })
        .ok()
    }
}

#[async_trait]
impl RelayClient for InProcessRelay {
    async fn push(&self, key: &str, info: &ConnectInfo) -> Result<(), SignalError> {
        if let Ok(message) = HandshakeMessage::decode(info) {
            self.pushes.lock().push((key.to_string(), message));
        }
        self.store.push(
            key,
            RelayEnvelope {
                source: info.source.clone(),
                sdp: info.sdp.clone(),
            },
        );
        Ok(())
    }

    async fn pull_once(&self, key: &str) -> Result<PullOutcome, SignalError> {
        Ok(match self.store.pull(key, self.wait).await {
            Some(envelope) => PullOutcome::Payload(ConnectInfo {
                source: envelope.source,
                sdp: envelope.sdp,
            }),
            None => PullOutcome::Empty,
        })
    }
}

/// Replays a fixed script of pull outcomes, then blocks forever.
#[derive(Default)]
pub struct ScriptedRelay {
    script: Mutex<VecDeque<Result<PullOutcome, SignalError>>>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedRelay {
    pub fn new(script: impl IntoIterator<Item = Result<PullOutcome, SignalError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn extend(&self, more: impl IntoIterator<Item = Result<PullOutcome, SignalError>>) {
        self.script.lock().extend(more);
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl RelayClient for ScriptedRelay {
    async fn push(&self, _key: &str, _info: &ConnectInfo) -> Result<(), SignalError> {
        Ok(())
    }

    async fn pull_once(&self, _key: &str) -> Result<PullOutcome, SignalError> {
        self.attempts.lock().push(Instant::now());
        let next = self.script.lock().pop_front();
        match next {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }
}

pub fn fast_config() -> TunnelConfig {
    TunnelConfig {
        ice_servers: Vec::new(),
        ..TunnelConfig::default()
    }
    .with_candidate_interval(Duration::from_millis(10))
    .with_backoff_step(Duration::from_millis(10))
    .with_negotiation_timeout(Duration::from_secs(10))
}

/// Polls `check` until it holds, panicking after `limit`.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while !check().await {
        assert!(Instant::now() < deadline, "condition not reached within {limit:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
