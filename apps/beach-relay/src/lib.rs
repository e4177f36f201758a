//! Rendezvous relay: a keyed mailbox service that lets two peers exchange a
//! handful of handshake payloads without ever talking to each other directly.

pub mod config;
pub mod handlers;
pub mod signaling;
pub mod storage;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::{config::Config, storage::MailboxStore};

#[derive(Clone)]
pub struct RelayState {
    pub store: Arc<MailboxStore>,
    pub pull_timeout: Duration,
}

impl RelayState {
    pub fn new(config: &Config) -> Self {
        Self {
            store: Arc::new(MailboxStore::new(config.mailbox_capacity)),
            pull_timeout: config.pull_timeout,
        }
    }
}

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/push/:key", post(handlers::push))
        .route("/pull/:key", get(handlers::pull))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Periodically drops idle mailboxes until the returned handle is aborted.
pub fn spawn_sweeper(store: Arc<MailboxStore>, idle_ttl: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(idle_ttl.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            let removed = store.sweep_idle(idle_ttl);
            if removed > 0 {
                tracing::debug!(removed, remaining = store.len(), "swept idle mailboxes");
            }
        }
    })
}
