use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::signaling::ConnectInfo;

/// Outcome of a push against a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// No pull was waiting and every buffer slot was taken.
    Dropped,
}

struct Mailbox {
    tx: mpsc::Sender<ConnectInfo>,
    rx: Mutex<mpsc::Receiver<ConnectInfo>>,
    waiting: AtomicUsize,
    touched_ms: AtomicU64,
}

impl Mailbox {
    fn new(capacity: usize, now_ms: u64) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            waiting: AtomicUsize::new(0),
            touched_ms: AtomicU64::new(now_ms),
        }
    }
}

/// Decrements the waiting counter even when the pull future is dropped
/// mid-wait (client hung up).
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Keyed single-slot handoff of handshake payloads.
pub struct MailboxStore {
    boxes: DashMap<String, Arc<Mailbox>>,
    capacity: usize,
    epoch: Instant,
}

impl MailboxStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            boxes: DashMap::new(),
            capacity: capacity.max(1),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn mailbox(&self, key: &str) -> Arc<Mailbox> {
        let now = self.now_ms();
        let mailbox = self
            .boxes
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mailbox::new(self.capacity, now)))
            .clone();
        mailbox.touched_ms.store(now, Ordering::Relaxed);
        mailbox
    }

    /// Hands `info` to a waiting pull on `key`, or parks it in a free slot.
    /// Never blocks.
    pub fn push(&self, key: &str, info: ConnectInfo) -> Delivery {
        let mailbox = self.mailbox(key);
        match mailbox.tx.try_send(info) {
            Ok(()) => Delivery::Accepted,
            Err(_) => Delivery::Dropped,
        }
    }

    /// Waits up to `wait` for a payload pushed to `key`.
    pub async fn pull(&self, key: &str, wait: Duration) -> Option<ConnectInfo> {
        let mailbox = self.mailbox(key);
        let result = {
            let _guard = WaitGuard::enter(&mailbox.waiting);
            timeout(wait, async {
                let mut rx = mailbox.rx.lock().await;
                rx.recv().await
            })
            .await
            .ok()
            .flatten()
        };
        mailbox.touched_ms.store(self.now_ms(), Ordering::Relaxed);
        result
    }

    /// Removes mailboxes nobody has touched for `ttl` and nobody is waiting
    /// on. Parked payloads in those mailboxes are discarded.
    pub fn sweep_idle(&self, ttl: Duration) -> usize {
        let now = self.now_ms();
        let ttl_ms = ttl.as_millis() as u64;
        let before = self.boxes.len();
        self.boxes.retain(|_, mailbox| {
            mailbox.waiting.load(Ordering::SeqCst) > 0
                || now.saturating_sub(mailbox.touched_ms.load(Ordering::Relaxed)) < ttl_ms
        });
        before.saturating_sub(self.boxes.len())
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}
