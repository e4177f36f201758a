//! Dialer role: every accepted local connection becomes its own session
//! with a fresh identity, negotiated against the listener and bridged.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bridge::BridgeSummary;
use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::identity::{PeerIdentity, RendezvousKey};
use crate::negotiator::{CandidatePacer, Role, SessionIo, SessionNegotiator};
use crate::signaling::{
    Admission, HandshakeMessage, MessageFilter, PullStream, RelayClient, SignalingTransport,
};
use crate::transport::{PeerConnector, PeerSetup};

#[derive(Clone)]
pub struct Dialer {
    key: RendezvousKey,
    config: TunnelConfig,
    signaling: SignalingTransport,
    connector: Arc<dyn PeerConnector>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Dialer {
    pub fn new(
        config: TunnelConfig,
        key: RendezvousKey,
        relay: Arc<dyn RelayClient>,
        connector: Arc<dyn PeerConnector>,
        shutdown: CancellationToken,
    ) -> Self {
        let signaling = SignalingTransport::new(relay, key.clone(), &config);
        Self {
            key,
            config,
            signaling,
            connector,
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Accepts local connections until shutdown, tunnelling each one.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), TunnelError> {
        let local_addr = listener.local_addr().map_err(TunnelError::LocalResource)?;
        tracing::info!(
            target = "beach_tunnel::dialer",
            key = %self.key,
            listen = %local_addr,
            "accepting local connections"
        );
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((socket, peer_addr)) => {
                    let _ = socket.set_nodelay(true);
                    let dialer = self.clone();
                    self.tracker.spawn(async move {
                        match dialer.tunnel(socket).await {
                            Ok(summary) => tracing::info!(
                                target = "beach_tunnel::dialer",
                                client = %peer_addr,
                                bytes_to_peer = summary.bytes_to_channel,
                                bytes_from_peer = summary.bytes_to_socket,
                                error = ?summary.error,
                                "tunnel closed"
                            ),
                            Err(TunnelError::Closed) => tracing::debug!(
                                target = "beach_tunnel::dialer",
                                client = %peer_addr,
                                "session closed before opening"
                            ),
                            Err(err) => tracing::warn!(
                                target = "beach_tunnel::dialer",
                                client = %peer_addr,
                                error = %err,
                                "tunnel failed"
                            ),
                        }
                    });
                }
                Err(err) => tracing::warn!(
                    target = "beach_tunnel::dialer",
                    error = %err,
                    "failed to accept local connection"
                ),
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(target = "beach_tunnel::dialer", "dialer stopped");
        Ok(())
    }

    /// Negotiates one session for `socket` and bridges it until either end
    /// closes.
    pub async fn tunnel<S>(&self, socket: S) -> Result<BridgeSummary, TunnelError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let identity = PeerIdentity::random();
        let cancel = self.shutdown.child_token();
        let (inbox_tx, inbox) = mpsc::channel(self.config.inbox_capacity.max(1));
        let pulls = self.signaling.pull(identity.as_str(), cancel.clone());
        let pump = tokio::spawn(pump_mailbox(pulls, MessageFilter::new(identity.clone()), inbox_tx));

        let result = self.negotiate(identity, socket, inbox, &cancel).await;
        cancel.cancel();
        let _ = pump.await;
        result
    }

    async fn negotiate<S>(
        &self,
        identity: PeerIdentity,
        socket: S,
        inbox: mpsc::Receiver<HandshakeMessage>,
        cancel: &CancellationToken,
    ) -> Result<BridgeSummary, TunnelError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let PeerSetup { link, events } = self.connector.connect(Role::Initiator).await?;
        tracing::debug!(target = "beach_tunnel::dialer", identity = %identity, "dialing listener");
        let mut negotiator = SessionNegotiator::initiator(
            identity,
            link,
            Arc::new(self.signaling.scoped(cancel.clone())),
            CandidatePacer::new(self.config.candidate_interval),
        );
        let mut io = SessionIo { inbox, events };

        let result: Result<BridgeSummary, TunnelError> = async {
            let channel = negotiator
                .establish(&mut io, self.config.negotiation_timeout, cancel)
                .await?;
            tracing::info!(
                target = "beach_tunnel::dialer",
                peer = ?negotiator.remote().map(PeerIdentity::as_str),
                "tunnel open"
            );
            Ok(negotiator.carry(channel, socket, &mut io, cancel).await)
        }
        .await;

        negotiator.close().await;
        result
    }
}

/// Moves admitted messages from this dialer's mailbox into its session
/// inbox. Never blocks on a full inbox.
async fn pump_mailbox(
    mut pulls: PullStream,
    filter: MessageFilter,
    inbox: mpsc::Sender<HandshakeMessage>,
) {
    while let Some(message) = pulls.next_message().await {
        let verdict = filter.admit(&message);
        if verdict != Admission::Accept {
            tracing::debug!(
                target = "beach_tunnel::dialer",
                ?verdict,
                sender = %message.sender,
                "filtered handshake message"
            );
            continue;
        }
        match inbox.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => tracing::debug!(
                target = "beach_tunnel::dialer",
                kind = message.payload.kind(),
                "session inbox full, dropping message"
            ),
            Err(TrySendError::Closed(_)) => break,
        }
    }
}
