//! Listener role: answers every dialer that shows up on the rendezvous key
//! and forwards each tunnel to a local service.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bridge::BridgeSummary;
use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::identity::{PeerIdentity, RendezvousKey};
use crate::negotiator::{CandidatePacer, Role, SessionIo, SessionNegotiator};
use crate::registry::{ConnectionRegistry, SessionTicket};
use crate::signaling::{
    Admission, HandshakeMessage, HandshakePayload, MessageFilter, RelayClient, SignalingTransport,
};
use crate::transport::{PeerConnector, PeerSetup};

pub struct Listener {
    key: RendezvousKey,
    signaling: SignalingTransport,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    context: SessionContext,
}

/// Everything a responder session task needs, cheap to clone per session.
#[derive(Clone)]
struct SessionContext {
    local: PeerIdentity,
    target: String,
    config: TunnelConfig,
    connector: Arc<dyn PeerConnector>,
    signaling: SignalingTransport,
    registry: Arc<ConnectionRegistry>,
}

impl Listener {
    /// `target` is the `host:port` each tunnel is forwarded to. Cancelling
    /// `shutdown` stops polling and tears down every session.
    pub fn new(
        config: TunnelConfig,
        key: RendezvousKey,
        relay: Arc<dyn RelayClient>,
        connector: Arc<dyn PeerConnector>,
        target: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        let signaling = SignalingTransport::new(relay, key.clone(), &config);
        let registry = Arc::new(ConnectionRegistry::new(config.inbox_capacity, shutdown.clone()));
        let context = SessionContext {
            local: key.listener_identity(),
            target: target.into(),
            config,
            connector,
            signaling: signaling.clone(),
            registry: Arc::clone(&registry),
        };
        Self {
            key,
            signaling,
            registry,
            shutdown,
            tracker: TaskTracker::new(),
            context,
        }
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.context.local
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Polls the rendezvous mailbox until shutdown, then waits for every
    /// session task to finish.
    pub async fn run(&self) -> Result<(), TunnelError> {
        tracing::info!(
            target = "beach_tunnel::listener",
            key = %self.key,
            forward_to = %self.context.target,
            "waiting for dialers"
        );
        let filter = MessageFilter::new(self.context.local.clone());
        let mut pulls = self.signaling.pull(self.key.as_str(), self.shutdown.clone());
        while let Some(message) = pulls.next_message().await {
            self.dispatch(&filter, message);
        }

        let closed = self.registry.close_all();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(target = "beach_tunnel::listener", closed, "listener stopped");
        Ok(())
    }

    fn dispatch(&self, filter: &MessageFilter, message: HandshakeMessage) {
        let verdict = filter.admit(&message);
        if verdict != Admission::Accept {
            tracing::debug!(
                target = "beach_tunnel::listener",
                ?verdict,
                sender = %message.sender,
                kind = message.payload.kind(),
                "filtered handshake message"
            );
            return;
        }

        if message.payload == HandshakePayload::Request {
            let ticket = self.registry.upsert(message.sender);
            tracing::debug!(
                target = "beach_tunnel::listener",
                peer = %ticket.identity,
                generation = ticket.generation,
                "session requested"
            );
            let context = self.context.clone();
            self.tracker.spawn(run_responder(context, ticket));
            return;
        }

        match self.registry.lookup(&message.sender) {
            Some(handle) => {
                handle.deliver(message);
            }
            None => tracing::debug!(
                target = "beach_tunnel::listener",
                sender = %message.sender,
                kind = message.payload.kind(),
                "no session for sender, dropping"
            ),
        }
    }
}

async fn run_responder(context: SessionContext, ticket: SessionTicket) {
    let SessionTicket {
        identity,
        generation,
        inbox,
        cancel,
    } = ticket;
    let result = responder_session(&context, &identity, inbox, &cancel).await;
    context.registry.remove(&identity, generation);
    match result {
        Ok(summary) => tracing::info!(
            target = "beach_tunnel::listener",
            peer = %identity,
            bytes_to_peer = summary.bytes_to_channel,
            bytes_from_peer = summary.bytes_to_socket,
            error = ?summary.error,
            "tunnel closed"
        ),
        Err(TunnelError::Closed) => tracing::debug!(
            target = "beach_tunnel::listener",
            peer = %identity,
            generation,
            "session closed before opening"
        ),
        Err(err) => tracing::warn!(
            target = "beach_tunnel::listener",
            peer = %identity,
            error = %err,
            "session failed"
        ),
    }
}

async fn responder_session(
    context: &SessionContext,
    identity: &PeerIdentity,
    inbox: tokio::sync::mpsc::Receiver<HandshakeMessage>,
    cancel: &CancellationToken,
) -> Result<BridgeSummary, TunnelError> {
    let PeerSetup { link, events } = context.connector.connect(Role::Responder).await?;
    let mut negotiator = SessionNegotiator::responder(
        context.local.clone(),
        identity.clone(),
        link,
        Arc::new(context.signaling.scoped(cancel.clone())),
        CandidatePacer::new(context.config.candidate_interval),
    );
    let mut io = SessionIo { inbox, events };

    let result: Result<BridgeSummary, TunnelError> = async {
        let channel = negotiator
            .establish(&mut io, context.config.negotiation_timeout, cancel)
            .await?;
        tracing::info!(target = "beach_tunnel::listener", peer = %identity, "tunnel open");
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                channel.sink.close().await;
                return Err(TunnelError::Closed);
            }
            connected = TcpStream::connect(context.target.as_str()) => connected,
        };
        let socket = match connected {
            Ok(socket) => socket,
            Err(err) => {
                channel.sink.close().await;
                return Err(TunnelError::LocalResource(err));
            }
        };
        let _ = socket.set_nodelay(true);
        Ok(negotiator.carry(channel, socket, &mut io, cancel).await)
    }
    .await;

    negotiator.close().await;
    result
}
