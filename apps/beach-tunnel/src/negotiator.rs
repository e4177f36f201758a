//! Offer/answer/candidate state machine for one session.
//!
//! The negotiator never touches the relay or the transport library
//! directly: outbound messages go through a [`SignalSink`], the peer
//! connection is a [`PeerLink`], and everything the link reports on its own
//! arrives as a [`LinkEvent`]. Both roles share this type.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bridge::{BridgeSummary, bridge};
use crate::error::TunnelError;
use crate::identity::PeerIdentity;
use crate::signaling::{HandshakeMessage, HandshakePayload, SignalSink};
use crate::transport::{CandidateInit, LinkEvent, PeerChannel, PeerLink};

const MAX_PENDING_CANDIDATES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialer: sends the Request, answers the offer.
    Initiator,
    /// Listener: offers in response to a Request and owns the data channel.
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingOffer,
    AwaitingAnswer,
    NegotiatingCandidates,
    Open,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingOffer => "awaiting_offer",
            SessionState::AwaitingAnswer => "awaiting_answer",
            SessionState::NegotiatingCandidates => "negotiating_candidates",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Minimum spacing between consecutive outbound messages of one session.
/// The relay keeps a single slot per mailbox, so bursts get dropped.
#[derive(Debug, Clone)]
pub struct CandidatePacer {
    interval: Duration,
    last: Option<Instant>,
}

impl CandidatePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until the next send is allowed and claims the slot.
    pub async fn ready(&mut self) {
        if let Some(last) = self.last {
            tokio::time::sleep_until(last + self.interval).await;
        }
        self.last = Some(Instant::now());
    }
}

/// Receivers a running session reads from: its share of the relay traffic
/// and its link's events.
pub struct SessionIo {
    pub inbox: mpsc::Receiver<HandshakeMessage>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

pub struct SessionNegotiator {
    role: Role,
    state: SessionState,
    local: PeerIdentity,
    remote: Option<PeerIdentity>,
    link: Box<dyn PeerLink>,
    signals: Arc<dyn SignalSink>,
    pacer: CandidatePacer,
    sent_candidates: HashSet<String>,
    applied_candidates: HashSet<String>,
    pending_candidates: Vec<(PeerIdentity, CandidateInit)>,
    offers_sent: usize,
    released: bool,
}

impl SessionNegotiator {
    pub fn responder(
        local: PeerIdentity,
        remote: PeerIdentity,
        link: Box<dyn PeerLink>,
        signals: Arc<dyn SignalSink>,
        pacer: CandidatePacer,
    ) -> Self {
        Self::new(Role::Responder, local, Some(remote), link, signals, pacer)
    }

    pub fn initiator(
        local: PeerIdentity,
        link: Box<dyn PeerLink>,
        signals: Arc<dyn SignalSink>,
        pacer: CandidatePacer,
    ) -> Self {
        Self::new(Role::Initiator, local, None, link, signals, pacer)
    }

    fn new(
        role: Role,
        local: PeerIdentity,
        remote: Option<PeerIdentity>,
        link: Box<dyn PeerLink>,
        signals: Arc<dyn SignalSink>,
        pacer: CandidatePacer,
    ) -> Self {
        Self {
            role,
            state: SessionState::Idle,
            local,
            remote,
            link,
            signals,
            pacer,
            sent_candidates: HashSet::new(),
            applied_candidates: HashSet::new(),
            pending_candidates: Vec::new(),
            offers_sent: 0,
            released: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    pub fn remote(&self) -> Option<&PeerIdentity> {
        self.remote.as_ref()
    }

    pub fn offers_sent(&self) -> usize {
        self.offers_sent
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        tracing::debug!(
            target = "beach_tunnel::negotiator",
            role = ?self.role,
            peer = ?self.remote.as_ref().map(PeerIdentity::as_str),
            from = %self.state,
            to = %next,
            "session state changed"
        );
        self.state = next;
    }

    /// Responder: create and send the offer. Initiator: broadcast the
    /// Request on the rendezvous key.
    pub async fn start(&mut self) -> Result<(), TunnelError> {
        if self.state != SessionState::Idle {
            return Err(TunnelError::Negotiation(format!(
                "session already started ({})",
                self.state
            )));
        }
        match self.role {
            Role::Responder => {
                let remote = self
                    .remote
                    .clone()
                    .ok_or_else(|| TunnelError::Negotiation("responder without a peer".into()))?;
                let description = self.link.create_offer().await?;
                self.send(Some(remote), HandshakePayload::Offer { description })
                    .await?;
                self.offers_sent += 1;
                self.transition(SessionState::AwaitingAnswer);
            }
            Role::Initiator => {
                self.send(None, HandshakePayload::Request).await?;
                self.transition(SessionState::AwaitingOffer);
            }
        }
        Ok(())
    }

    /// Feeds one admitted handshake message into the machine. An `Err` is a
    /// negotiation failure and the session should be torn down; anything
    /// that is merely out of place is dropped.
    pub async fn handle_message(&mut self, message: HandshakeMessage) -> Result<(), TunnelError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if let Some(remote) = &self.remote {
            if message.sender != *remote {
                tracing::debug!(
                    target = "beach_tunnel::negotiator",
                    sender = %message.sender,
                    peer = %remote,
                    kind = message.payload.kind(),
                    "dropping message from a peer outside this session"
                );
                return Ok(());
            }
        }

        let HandshakeMessage {
            sender, payload, ..
        } = message;
        match (self.role, self.state, payload) {
            (Role::Responder, SessionState::AwaitingAnswer, HandshakePayload::Answer { description }) => {
                self.link.set_remote_description(&description).await?;
                self.transition(SessionState::NegotiatingCandidates);
                self.flush_pending().await;
                self.send_local_candidates().await?;
            }
            (Role::Initiator, SessionState::AwaitingOffer, HandshakePayload::Offer { description }) => {
                self.remote = Some(sender.clone());
                let answer = self.link.create_answer(&description).await?;
                self.send(Some(sender), HandshakePayload::Answer { description: answer })
                    .await?;
                self.transition(SessionState::NegotiatingCandidates);
                self.flush_pending().await;
                self.send_local_candidates().await?;
            }
            (
                _,
                SessionState::NegotiatingCandidates | SessionState::Open,
                HandshakePayload::Candidate {
                    candidate,
                    mid,
                    line_index,
                },
            ) => {
                self.apply_remote_candidate(CandidateInit {
                    candidate,
                    mid,
                    line_index,
                })
                .await;
            }
            (
                _,
                SessionState::AwaitingOffer | SessionState::AwaitingAnswer,
                HandshakePayload::Candidate {
                    candidate,
                    mid,
                    line_index,
                },
            ) => {
                if self.pending_candidates.len() < MAX_PENDING_CANDIDATES {
                    self.pending_candidates.push((
                        sender,
                        CandidateInit {
                            candidate,
                            mid,
                            line_index,
                        },
                    ));
                } else {
                    tracing::debug!(target = "beach_tunnel::negotiator", "pending candidate buffer full");
                }
            }
            (role, state, payload) => {
                tracing::debug!(
                    target = "beach_tunnel::negotiator",
                    ?role,
                    %state,
                    kind = payload.kind(),
                    "ignoring out-of-place handshake message"
                );
            }
        }
        Ok(())
    }

    /// Returns the channel when this event completes the session.
    pub async fn handle_link_event(&mut self, event: LinkEvent) -> Option<PeerChannel> {
        match event {
            LinkEvent::Open(channel) if self.state == SessionState::NegotiatingCandidates => {
                self.transition(SessionState::Open);
                Some(channel)
            }
            LinkEvent::Open(channel) => {
                tracing::debug!(
                    target = "beach_tunnel::negotiator",
                    state = %self.state,
                    "unexpected channel open"
                );
                channel.sink.close().await;
                None
            }
            LinkEvent::Closed => {
                self.transition(SessionState::Closed);
                None
            }
        }
    }

    /// Drives the session until its channel opens. Fails with `Timeout`
    /// after `timeout` and with `Closed` when cancelled or when the link
    /// goes away first.
    pub async fn establish(
        &mut self,
        io: &mut SessionIo,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PeerChannel, TunnelError> {
        let negotiation = async {
            if self.state == SessionState::Idle {
                self.start().await?;
            }
            loop {
                tokio::select! {
                    event = io.events.recv() => {
                        let Some(event) = event else {
                            return Err(TunnelError::Closed);
                        };
                        if let Some(channel) = self.handle_link_event(event).await {
                            return Ok(channel);
                        }
                        if self.state == SessionState::Closed {
                            return Err(TunnelError::Closed);
                        }
                    }
                    message = io.inbox.recv() => {
                        let Some(message) = message else {
                            return Err(TunnelError::Closed);
                        };
                        self.handle_message(message).await?;
                    }
                }
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TunnelError::Closed),
            result = tokio::time::timeout(timeout, negotiation) => {
                result.unwrap_or(Err(TunnelError::Timeout))
            }
        }
    }

    /// Keeps an open session responsive to late candidates until the link
    /// closes, the inbox is dropped, or `cancel` fires.
    pub async fn watch(&mut self, io: &mut SessionIo, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                event = io.events.recv() => match event {
                    Some(event) => {
                        let _ = self.handle_link_event(event).await;
                        if self.state == SessionState::Closed {
                            return;
                        }
                    }
                    None => return,
                },
                message = io.inbox.recv() => match message {
                    Some(message) => {
                        if let Err(err) = self.handle_message(message).await {
                            tracing::debug!(
                                target = "beach_tunnel::negotiator",
                                error = %err,
                                "late handshake message failed"
                            );
                        }
                    }
                    None => return,
                },
            }
        }
    }

    /// Bridges an open channel to `socket` for as long as both stay up.
    pub async fn carry<S>(
        &mut self,
        channel: PeerChannel,
        socket: S,
        io: &mut SessionIo,
        cancel: &CancellationToken,
    ) -> BridgeSummary
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let shutdown = cancel.child_token();
        let bridged = bridge(channel, socket, shutdown.clone());
        tokio::pin!(bridged);
        tokio::select! {
            summary = &mut bridged => summary,
            _ = self.watch(io, &shutdown) => {
                shutdown.cancel();
                bridged.await
            }
        }
    }

    /// Releases the link. Safe to call more than once.
    pub async fn close(&mut self) {
        if !self.released {
            self.released = true;
            self.link.close().await;
        }
        self.transition(SessionState::Closed);
    }

    async fn send(&mut self, to: Option<PeerIdentity>, payload: HandshakePayload) -> Result<(), TunnelError> {
        self.pacer.ready().await;
        let message = HandshakeMessage::new(self.local.clone(), to, payload);
        self.signals.send(message).await
    }

    async fn send_local_candidates(&mut self) -> Result<(), TunnelError> {
        let Some(remote) = self.remote.clone() else {
            return Ok(());
        };
        let gathered = self.link.gather_candidates().await?;
        let mut skipped = 0usize;
        for candidate in gathered {
            if candidate.candidate.is_empty() || !self.sent_candidates.insert(candidate.candidate.clone()) {
                skipped += 1;
                continue;
            }
            let payload = HandshakePayload::candidate(&candidate);
            if let Err(err) = self.send(Some(remote.clone()), payload).await {
                tracing::warn!(
                    target = "beach_tunnel::negotiator",
                    peer = %remote,
                    error = %err,
                    "failed to send local candidate"
                );
            }
        }
        tracing::debug!(
            target = "beach_tunnel::negotiator",
            peer = %remote,
            sent = self.sent_candidates.len(),
            skipped,
            "local candidates sent"
        );
        Ok(())
    }

    async fn flush_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending_candidates);
        for (sender, candidate) in pending {
            if Some(&sender) == self.remote.as_ref() {
                self.apply_remote_candidate(candidate).await;
            }
        }
    }

    async fn apply_remote_candidate(&mut self, candidate: CandidateInit) {
        if candidate.candidate.is_empty() || self.applied_candidates.contains(&candidate.candidate) {
            return;
        }
        let key = candidate.candidate.clone();
        match self.link.add_candidate(candidate).await {
            Ok(()) => {
                self.applied_candidates.insert(key);
            }
            Err(err) => tracing::debug!(
                target = "beach_tunnel::negotiator",
                error = %err,
                candidate = %key,
                "ignoring remote candidate"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::transport::memory::MemoryHub;
    use crate::transport::{PeerConnector, PeerSetup};

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(Instant, HandshakeMessage)>>,
    }

    impl Outbox {
        fn payloads(&self) -> Vec<HandshakePayload> {
            self.sent.lock().iter().map(|(_, m)| m.payload.clone()).collect()
        }

        fn candidates(&self) -> Vec<CandidateInit> {
            self.payloads()
                .into_iter()
                .filter_map(|payload| match payload {
                    HandshakePayload::Candidate {
                        candidate,
                        mid,
                        line_index,
                    } => Some(CandidateInit {
                        candidate,
                        mid,
                        line_index,
                    }),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl SignalSink for Outbox {
        async fn send(&self, message: HandshakeMessage) -> Result<(), TunnelError> {
            self.sent.lock().push((Instant::now(), message));
            Ok(())
        }
    }

    fn from(sender: &str, payload: HandshakePayload) -> HandshakeMessage {
        HandshakeMessage::new(sender.into(), Some("room1".into()), payload)
    }

    fn candidate_message(sender: &str, candidate: &CandidateInit) -> HandshakeMessage {
        from(sender, HandshakePayload::candidate(candidate))
    }

    struct Fixture {
        responder: SessionNegotiator,
        responder_events: mpsc::UnboundedReceiver<LinkEvent>,
        outbox: Arc<Outbox>,
        dialer: PeerSetup,
    }

    async fn fixture(hub: MemoryHub) -> Fixture {
        let connector = hub.connector();
        let PeerSetup { link, events } = connector.connect(Role::Responder).await.expect("responder");
        let dialer = connector.connect(Role::Initiator).await.expect("dialer");
        let outbox = Arc::new(Outbox::default());
        let responder = SessionNegotiator::responder(
            "room1".into(),
            "dialer".into(),
            link,
            outbox.clone(),
            CandidatePacer::new(Duration::from_millis(100)),
        );
        Fixture {
            responder,
            responder_events: events,
            outbox,
            dialer,
        }
    }

    fn offer_description(outbox: &Outbox) -> String {
        match outbox.payloads().first() {
            Some(HandshakePayload::Offer { description }) => description.clone(),
            other => panic!("expected an offer first, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn responder_opens_exactly_once_with_one_offer() {
        let mut fx = fixture(MemoryHub::new()).await;
        fx.responder.start().await.expect("start");
        assert_eq!(fx.responder.state(), SessionState::AwaitingAnswer);

        let answer = fx
            .dialer
            .link
            .create_answer(&offer_description(&fx.outbox))
            .await
            .expect("answer");
        fx.responder
            .handle_message(from("dialer", HandshakePayload::Answer { description: answer.clone() }))
            .await
            .expect("answer accepted");
        assert_eq!(fx.responder.state(), SessionState::NegotiatingCandidates);
        for candidate in fx.outbox.candidates() {
            fx.dialer.link.add_candidate(candidate).await.expect("dialer add");
        }

        for candidate in fx.dialer.link.gather_candidates().await.expect("gather") {
            fx.responder
                .handle_message(candidate_message("dialer", &candidate))
                .await
                .expect("candidate");
        }

        let event = fx.responder_events.recv().await.expect("event");
        let channel = fx.responder.handle_link_event(event).await;
        assert!(channel.is_some());
        assert_eq!(fx.responder.state(), SessionState::Open);

        // A replayed answer changes nothing.
        fx.responder
            .handle_message(from("dialer", HandshakePayload::Answer { description: answer }))
            .await
            .expect("replay ignored");
        assert_eq!(fx.responder.state(), SessionState::Open);
        assert_eq!(fx.responder.offers_sent(), 1);
        let offers = fx
            .outbox
            .payloads()
            .iter()
            .filter(|p| matches!(p, HandshakePayload::Offer { .. }))
            .count();
        assert_eq!(offers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_gathered_candidates_are_sent_once() {
        let mut fx = fixture(MemoryHub::new().with_repeated_gathering()).await;
        fx.responder.start().await.expect("start");
        let answer = fx
            .dialer
            .link
            .create_answer(&offer_description(&fx.outbox))
            .await
            .expect("answer");
        fx.responder
            .handle_message(from("dialer", HandshakePayload::Answer { description: answer }))
            .await
            .expect("answer");
        let sent = fx.outbox.candidates();
        let unique: HashSet<_> = sent.iter().map(|c| c.candidate.clone()).collect();
        assert_eq!(sent.len(), 2);
        assert_eq!(unique.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_messages_respect_pacing_interval() {
        let mut fx = fixture(MemoryHub::new().with_candidates(4, 4)).await;
        fx.responder.start().await.expect("start");
        let answer = fx
            .dialer
            .link
            .create_answer(&offer_description(&fx.outbox))
            .await
            .expect("answer");
        fx.responder
            .handle_message(from("dialer", HandshakePayload::Answer { description: answer }))
            .await
            .expect("answer");

        let stamps: Vec<Instant> = fx.outbox.sent.lock().iter().map(|(at, _)| *at).collect();
        assert_eq!(stamps.len(), 5);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn early_candidates_wait_for_the_answer() {
        let mut fx = fixture(MemoryHub::new()).await;
        fx.responder.start().await.expect("start");
        let answer = fx
            .dialer
            .link
            .create_answer(&offer_description(&fx.outbox))
            .await
            .expect("answer");
        for candidate in fx.dialer.link.gather_candidates().await.expect("gather") {
            fx.responder
                .handle_message(candidate_message("dialer", &candidate))
                .await
                .expect("buffered");
        }
        assert_eq!(fx.responder.state(), SessionState::AwaitingAnswer);

        fx.responder
            .handle_message(from("dialer", HandshakePayload::Answer { description: answer }))
            .await
            .expect("answer");
        for candidate in fx.outbox.candidates() {
            fx.dialer.link.add_candidate(candidate).await.expect("dialer add");
        }
        let event = fx.responder_events.recv().await.expect("event");
        assert!(fx.responder.handle_link_event(event).await.is_some());
    }

    #[tokio::test]
    async fn messages_from_other_peers_are_ignored() {
        let mut fx = fixture(MemoryHub::new()).await;
        fx.responder.start().await.expect("start");
        fx.responder
            .handle_message(from(
                "stranger",
                HandshakePayload::Answer {
                    description: "memory-answer:1".into(),
                },
            ))
            .await
            .expect("ignored");
        assert_eq!(fx.responder.state(), SessionState::AwaitingAnswer);
    }

    #[tokio::test]
    async fn bad_answer_is_a_negotiation_error() {
        let mut fx = fixture(MemoryHub::new()).await;
        fx.responder.start().await.expect("start");
        let err = fx
            .responder
            .handle_message(from(
                "dialer",
                HandshakePayload::Answer {
                    description: "not-an-answer".into(),
                },
            ))
            .await
            .expect_err("rejected");
        assert!(matches!(err, TunnelError::Negotiation(_)));
    }

    #[tokio::test]
    async fn undecodable_candidate_is_not_fatal() {
        let mut fx = fixture(MemoryHub::new()).await;
        fx.responder.start().await.expect("start");
        let answer = fx
            .dialer
            .link
            .create_answer(&offer_description(&fx.outbox))
            .await
            .expect("answer");
        fx.responder
            .handle_message(from("dialer", HandshakePayload::Answer { description: answer }))
            .await
            .expect("answer");
        fx.responder
            .handle_message(candidate_message("dialer", &CandidateInit::new("garbage")))
            .await
            .expect("ignored");
        assert_eq!(fx.responder.state(), SessionState::NegotiatingCandidates);
    }

    #[tokio::test]
    async fn initiator_broadcasts_request_then_locks_onto_first_offerer() {
        let hub = MemoryHub::new();
        let connector = hub.connector();
        let listener = connector.connect(Role::Responder).await.expect("listener");
        let PeerSetup { link, .. } = connector.connect(Role::Initiator).await.expect("dialer");
        let outbox = Arc::new(Outbox::default());
        let mut dialer = SessionNegotiator::initiator(
            "dialer".into(),
            link,
            outbox.clone(),
            CandidatePacer::new(Duration::ZERO),
        );
        dialer.start().await.expect("start");
        assert_eq!(dialer.state(), SessionState::AwaitingOffer);
        {
            let sent = outbox.sent.lock();
            assert_eq!(sent[0].1.payload, HandshakePayload::Request);
            assert_eq!(sent[0].1.to, None);
        }

        let offer = listener.link.create_offer().await.expect("offer");
        dialer
            .handle_message(HandshakeMessage::new(
                "room1".into(),
                Some("dialer".into()),
                HandshakePayload::Offer { description: offer },
            ))
            .await
            .expect("offer");
        assert_eq!(dialer.state(), SessionState::NegotiatingCandidates);
        assert_eq!(dialer.remote().map(PeerIdentity::as_str), Some("room1"));

        dialer
            .handle_message(HandshakeMessage::new(
                "other-listener".into(),
                Some("dialer".into()),
                HandshakePayload::Offer {
                    description: "memory-offer:99".into(),
                },
            ))
            .await
            .expect("ignored");
        let answers = outbox
            .payloads()
            .iter()
            .filter(|p| matches!(p, HandshakePayload::Answer { .. }))
            .count();
        assert_eq!(answers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn establish_times_out_without_an_answer() {
        let mut fx = fixture(MemoryHub::new()).await;
        let (_inbox_tx, inbox) = mpsc::channel(4);
        let mut io = SessionIo {
            inbox,
            events: fx.responder_events,
        };
        let result = fx
            .responder
            .establish(&mut io, Duration::from_secs(30), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TunnelError::Timeout)));
    }

    #[tokio::test]
    async fn establish_stops_on_cancel() {
        let mut fx = fixture(MemoryHub::new()).await;
        let (_inbox_tx, inbox) = mpsc::channel(4);
        let mut io = SessionIo {
            inbox,
            events: fx.responder_events,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = fx
            .responder
            .establish(&mut io, Duration::from_secs(30), &cancel)
            .await;
        assert!(matches!(result, Err(TunnelError::Closed)));
        fx.responder.close().await;
        fx.responder.close().await;
        assert_eq!(fx.responder.state(), SessionState::Closed);
    }
}
