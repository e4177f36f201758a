use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::identity::PeerIdentity;
use crate::signaling::HandshakeMessage;

/// Dispatch-side view of one live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    generation: u64,
    inbox: mpsc::Sender<HandshakeMessage>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues a message for the session without waiting. A full inbox drops
    /// the message.
    pub fn deliver(&self, message: HandshakeMessage) -> bool {
        match self.inbox.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                tracing::debug!(
                    target = "beach_tunnel::registry",
                    generation = self.generation,
                    kind = message.payload.kind(),
                    "session inbox full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What the session task owns after `upsert`.
#[derive(Debug)]
pub struct SessionTicket {
    pub identity: PeerIdentity,
    pub generation: u64,
    pub inbox: mpsc::Receiver<HandshakeMessage>,
    pub cancel: CancellationToken,
}

/// At most one session per remote identity. Every mutation happens under
/// one lock, so a Request and a later Answer from the same identity always
/// see a consistent map.
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<PeerIdentity, SessionHandle>>,
    next_generation: AtomicU64,
    inbox_capacity: usize,
    parent: CancellationToken,
}

impl ConnectionRegistry {
    /// Session tokens are children of `parent`, so cancelling it ends every
    /// session.
    pub fn new(inbox_capacity: usize, parent: CancellationToken) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            inbox_capacity: inbox_capacity.max(1),
            parent,
        }
    }

    /// Registers a fresh session for `identity`, closing whichever session
    /// held it before.
    pub fn upsert(&self, identity: PeerIdentity) -> SessionTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (inbox_tx, inbox) = mpsc::channel(self.inbox_capacity);
        let cancel = self.parent.child_token();
        let handle = SessionHandle {
            generation,
            inbox: inbox_tx,
            cancel: cancel.clone(),
        };

        let previous = self.entries.lock().insert(identity.clone(), handle);
        if let Some(previous) = previous {
            tracing::debug!(
                target = "beach_tunnel::registry",
                peer = %identity,
                evicted = previous.generation,
                replacement = generation,
                "evicting superseded session"
            );
            previous.close();
        }

        SessionTicket {
            identity,
            generation,
            inbox,
            cancel,
        }
    }

    pub fn lookup(&self, identity: &PeerIdentity) -> Option<SessionHandle> {
        self.entries.lock().get(identity).cloned()
    }

    /// Removes the entry only while it still belongs to `generation`; a
    /// superseded session can't remove its successor.
    pub fn remove(&self, identity: &PeerIdentity, generation: u64) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(identity) {
            Some(handle) if handle.generation == generation => {
                if let Some(handle) = entries.remove(identity) {
                    handle.close();
                }
                true
            }
            _ => false,
        }
    }

    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        for (_, handle) in &drained {
            handle.close();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
