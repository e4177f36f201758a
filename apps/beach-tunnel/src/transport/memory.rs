//! In-process peer transport. Descriptions are opaque tokens naming a link
//! in a shared hub, candidates are plain strings, and a pair of links opens
//! once both sides hold each other's description and enough candidates.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    CandidateInit, ChannelSink, INBOUND_QUEUE_DEPTH, LinkEvent, PeerChannel, PeerConnector, PeerLink,
    PeerSetup,
};
use crate::error::TunnelError;
use crate::negotiator::Role;

const OFFER_PREFIX: &str = "memory-offer:";
const ANSWER_PREFIX: &str = "memory-answer:";
const CANDIDATE_PREFIX: &str = "candidate:";

#[derive(Debug, Clone, Copy)]
struct HubSettings {
    candidates_per_link: usize,
    required_candidates: usize,
    repeat_gathering: bool,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    links: HashMap<u64, LinkSlot>,
}

struct LinkSlot {
    events: mpsc::UnboundedSender<LinkEvent>,
    peer: Option<u64>,
    remote_applied: bool,
    received: HashSet<String>,
    sink: Option<Arc<MemorySink>>,
}

impl LinkSlot {
    fn ready(&self, required: usize) -> bool {
        self.remote_applied && self.received.len() >= required && self.sink.is_none()
    }
}

#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
    settings: HubSettings,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    /// Two candidates per side, both required before the channel opens.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            settings: HubSettings {
                candidates_per_link: 2,
                required_candidates: 2,
                repeat_gathering: false,
            },
        }
    }

    pub fn with_candidates(mut self, per_link: usize, required: usize) -> Self {
        self.settings.candidates_per_link = per_link;
        self.settings.required_candidates = required;
        self
    }

    /// Gathering reports every candidate twice, as two overlapping passes
    /// would.
    pub fn with_repeated_gathering(mut self) -> Self {
        self.settings.repeat_gathering = true;
        self
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { hub: self.clone() }
    }

    /// Links registered and not yet closed.
    pub fn live_links(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Links whose channel has opened and not yet closed.
    pub fn open_links(&self) -> usize {
        self.state
            .lock()
            .links
            .values()
            .filter(|slot| slot.sink.is_some())
            .count()
    }

    fn register(&self) -> (u64, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.links.insert(
            id,
            LinkSlot {
                events,
                peer: None,
                remote_applied: false,
                received: HashSet::new(),
                sink: None,
            },
        );
        (id, rx)
    }

    fn with_slot<T>(
        &self,
        id: u64,
        f: impl FnOnce(&mut HubState) -> Result<T, TunnelError>,
    ) -> Result<T, TunnelError> {
        let mut state = self.state.lock();
        if !state.links.contains_key(&id) {
            return Err(TunnelError::Closed);
        }
        let result = f(&mut *state)?;
        self.try_open(&mut *state, id);
        Ok(result)
    }

    fn try_open(&self, state: &mut HubState, id: u64) {
        let required = self.settings.required_candidates;
        let Some(peer) = state.links.get(&id).and_then(|slot| slot.peer) else {
            return;
        };
        let both_ready = [id, peer].iter().all(|link| {
            state
                .links
                .get(link)
                .is_some_and(|slot| slot.ready(required))
        });
        let paired = state.links.get(&peer).and_then(|slot| slot.peer) == Some(id);
        if !both_ready || !paired {
            return;
        }

        let (to_local, local_inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let (to_peer, peer_inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let weak = Arc::downgrade(&self.state);
        let pairs = [(id, to_peer, local_inbound), (peer, to_local, peer_inbound)];
        for (link, outbound, inbound) in pairs {
            let sink = Arc::new(MemorySink {
                link,
                outbound: Mutex::new(Some(outbound)),
                hub: Weak::clone(&weak),
            });
            if let Some(slot) = state.links.get_mut(&link) {
                slot.sink = Some(Arc::clone(&sink));
                let channel = PeerChannel { sink, inbound };
                let _ = slot.events.send(LinkEvent::Open(channel));
            }
        }
        tracing::debug!(target = "beach_tunnel::transport::memory", link = id, peer, "memory link open");
    }

    fn close(state: &Mutex<HubState>, id: u64) {
        let mut state = state.lock();
        let peer = state.links.get(&id).and_then(|slot| slot.peer);
        for link in std::iter::once(id).chain(peer) {
            let paired = link == id || state.links.get(&link).and_then(|slot| slot.peer) == Some(id);
            if !paired {
                continue;
            }
            if let Some(slot) = state.links.remove(&link) {
                if let Some(sink) = slot.sink {
                    sink.outbound.lock().take();
                }
                let _ = slot.events.send(LinkEvent::Closed);
            }
        }
    }
}

struct MemorySink {
    link: u64,
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    hub: Weak<Mutex<HubState>>,
}

#[async_trait]
impl ChannelSink for MemorySink {
    async fn send(&self, data: Bytes) -> Result<(), TunnelError> {
        let outbound = self.outbound.lock().clone();
        match outbound {
            Some(tx) => tx.send(data).await.map_err(|_| TunnelError::Closed),
            None => Err(TunnelError::Closed),
        }
    }

    async fn close(&self) {
        if let Some(state) = self.hub.upgrade() {
            MemoryHub::close(&state, self.link);
        }
    }
}

pub struct MemoryLink {
    id: u64,
    hub: MemoryHub,
}

fn parse_token(token: &str, prefix: &str) -> Result<u64, TunnelError> {
    token
        .strip_prefix(prefix)
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| TunnelError::Negotiation(format!("unrecognised description {token:?}")))
}

#[async_trait]
impl PeerLink for MemoryLink {
    async fn create_offer(&self) -> Result<String, TunnelError> {
        self.hub.with_slot(self.id, |_| Ok(format!("{OFFER_PREFIX}{}", self.id)))
    }

    async fn create_answer(&self, offer: &str) -> Result<String, TunnelError> {
        let peer = parse_token(offer, OFFER_PREFIX)?;
        self.hub.with_slot(self.id, |state| {
            if !state.links.contains_key(&peer) {
                return Err(TunnelError::Negotiation(format!("offer from unknown link {peer}")));
            }
            if let Some(slot) = state.links.get_mut(&self.id) {
                slot.peer = Some(peer);
                slot.remote_applied = true;
            }
            Ok(format!("{ANSWER_PREFIX}{}", self.id))
        })
    }

    async fn set_remote_description(&self, answer: &str) -> Result<(), TunnelError> {
        let peer = parse_token(answer, ANSWER_PREFIX)?;
        self.hub.with_slot(self.id, |state| {
            let answers_us = state.links.get(&peer).and_then(|slot| slot.peer) == Some(self.id);
            if !answers_us {
                return Err(TunnelError::Negotiation(format!(
                    "answer from link {peer} does not match our offer"
                )));
            }
            if let Some(slot) = state.links.get_mut(&self.id) {
                slot.peer = Some(peer);
                slot.remote_applied = true;
            }
            Ok(())
        })
    }

    async fn gather_candidates(&self) -> Result<Vec<CandidateInit>, TunnelError> {
        let settings = self.hub.settings;
        self.hub.with_slot(self.id, |_| {
            let pass: Vec<_> = (0..settings.candidates_per_link)
                .map(|n| CandidateInit {
                    candidate: format!("{CANDIDATE_PREFIX}{} {n} memory host", self.id),
                    mid: Some("0".into()),
                    line_index: Some(0),
                })
                .collect();
            let mut gathered = pass.clone();
            if settings.repeat_gathering {
                gathered.extend(pass);
            }
            Ok(gathered)
        })
    }

    async fn add_candidate(&self, candidate: CandidateInit) -> Result<(), TunnelError> {
        if !candidate.candidate.starts_with(CANDIDATE_PREFIX) {
            return Err(TunnelError::Negotiation(format!(
                "unparseable candidate {:?}",
                candidate.candidate
            )));
        }
        self.hub.with_slot(self.id, |state| {
            if let Some(slot) = state.links.get_mut(&self.id) {
                slot.received.insert(candidate.candidate);
            }
            Ok(())
        })
    }

    async fn close(&self) {
        MemoryHub::close(&self.hub.state, self.id);
    }
}

#[derive(Clone)]
pub struct MemoryConnector {
    hub: MemoryHub,
}

#[async_trait]
impl PeerConnector for MemoryConnector {
    async fn connect(&self, role: Role) -> Result<PeerSetup, TunnelError> {
        let (id, events) = self.hub.register();
        tracing::trace!(target = "beach_tunnel::transport::memory", link = id, ?role, "memory link created");
        Ok(PeerSetup {
            link: Box::new(MemoryLink {
                id,
                hub: self.hub.clone(),
            }),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair(hub: &MemoryHub) -> (PeerSetup, PeerSetup) {
        let connector = hub.connector();
        let responder = connector.connect(Role::Responder).await.expect("responder");
        let initiator = connector.connect(Role::Initiator).await.expect("initiator");
        (responder, initiator)
    }

    async fn exchange(responder: &PeerSetup, initiator: &PeerSetup) {
        let offer = responder.link.create_offer().await.expect("offer");
        let answer = initiator.link.create_answer(&offer).await.expect("answer");
        responder.link.set_remote_description(&answer).await.expect("remote");
        for candidate in responder.link.gather_candidates().await.expect("gather") {
            initiator.link.add_candidate(candidate).await.expect("add");
        }
        for candidate in initiator.link.gather_candidates().await.expect("gather") {
            responder.link.add_candidate(candidate).await.expect("add");
        }
    }

    fn expect_open(event: Option<LinkEvent>) -> PeerChannel {
        match event {
            Some(LinkEvent::Open(channel)) => channel,
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn opens_after_full_exchange_and_moves_bytes() {
        let hub = MemoryHub::new();
        let (mut responder, mut initiator) = pair(&hub).await;
        exchange(&responder, &initiator).await;

        let mut a = expect_open(responder.events.recv().await);
        let mut b = expect_open(initiator.events.recv().await);
        a.sink.send(Bytes::from_static(b"ping")).await.expect("send");
        b.sink.send(Bytes::from_static(b"pong")).await.expect("send");
        assert_eq!(b.inbound.recv().await.as_deref(), Some(&b"ping"[..]));
        assert_eq!(a.inbound.recv().await.as_deref(), Some(&b"pong"[..]));
        assert_eq!(hub.open_links(), 2);
    }

    #[tokio::test]
    async fn stays_closed_until_enough_candidates_arrive() {
        let hub = MemoryHub::new();
        let (mut responder, initiator) = pair(&hub).await;
        let offer = responder.link.create_offer().await.expect("offer");
        let answer = initiator.link.create_answer(&offer).await.expect("answer");
        responder.link.set_remote_description(&answer).await.expect("remote");
        let mut candidates = initiator.link.gather_candidates().await.expect("gather");
        candidates.truncate(1);
        for candidate in candidates {
            responder.link.add_candidate(candidate).await.expect("add");
        }
        assert!(responder.events.try_recv().is_err());
        assert_eq!(hub.open_links(), 0);
    }

    #[tokio::test]
    async fn sender_waits_once_the_peer_queue_is_full() {
        let hub = MemoryHub::new();
        let (mut responder, mut initiator) = pair(&hub).await;
        exchange(&responder, &initiator).await;
        let a = expect_open(responder.events.recv().await);
        let mut b = expect_open(initiator.events.recv().await);

        for _ in 0..INBOUND_QUEUE_DEPTH {
            a.sink.send(Bytes::from_static(b"x")).await.expect("send");
        }
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            a.sink.send(Bytes::from_static(b"y")),
        )
        .await;
        assert!(blocked.is_err(), "send past the queue depth must wait");

        assert!(b.inbound.recv().await.is_some());
        a.sink.send(Bytes::from_static(b"y")).await.expect("send after drain");
    }

    #[tokio::test]
    async fn closing_one_side_closes_both() {
        let hub = MemoryHub::new();
        let (mut responder, mut initiator) = pair(&hub).await;
        exchange(&responder, &initiator).await;
        let a = expect_open(responder.events.recv().await);
        let mut b = expect_open(initiator.events.recv().await);

        a.sink.close().await;
        assert!(matches!(initiator.events.recv().await, Some(LinkEvent::Closed)));
        assert!(matches!(responder.events.recv().await, Some(LinkEvent::Closed)));
        assert_eq!(b.inbound.recv().await, None);
        assert!(b.sink.send(Bytes::from_static(b"late")).await.is_err());
        assert_eq!(hub.live_links(), 0);
    }

    #[tokio::test]
    async fn rejects_foreign_descriptions_and_candidates() {
        let hub = MemoryHub::new();
        let (responder, initiator) = pair(&hub).await;
        assert!(initiator.link.create_answer("sdp-from-elsewhere").await.is_err());
        assert!(responder.link.set_remote_description("memory-answer:99").await.is_err());
        assert!(responder.link.add_candidate(CandidateInit::new("garbage")).await.is_err());
    }

    #[tokio::test]
    async fn repeated_gathering_reports_duplicates() {
        let hub = MemoryHub::new().with_repeated_gathering();
        let (responder, _initiator) = pair(&hub).await;
        let gathered = responder.link.gather_candidates().await.expect("gather");
        let unique: HashSet<_> = gathered.iter().map(|c| c.candidate.clone()).collect();
        assert_eq!(gathered.len(), 4);
        assert_eq!(unique.len(), 2);
    }
}
