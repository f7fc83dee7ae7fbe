//! Subscriber fan-out registry (§4.5 / C5).
//!
//! Each admitted peer owns a bounded, oldest-drop outbound queue. Pushing a
//! broadcast into a queue never blocks and never stalls delivery to any other
//! peer. The per-peer *delivery* deadline named in the design notes is
//! enforced by whoever drains the queue onto the wire (the gateway binary):
//! it wraps its socket write in a timeout and calls [`SubscriberRegistry::mark_stale`]
//! on expiry, which evicts the peer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Default outbound queue depth per peer before the oldest pending message is dropped.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Number of recent broadcast message ids retained for de-duplication.
pub const DEDUP_WINDOW: usize = 512;

/// A bounded, oldest-drop byte queue shared between the registry (producer)
/// and a peer's writer task (consumer).
#[derive(Debug)]
pub struct PeerQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    capacity: usize,
}

impl PeerQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, item: Vec<u8>) {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if q.len() >= self.capacity {
            q.pop_front();
        }
        q.push_back(item);
        drop(q);
        self.notify.notify_one();
    }

    /// Waits for and returns the next queued message, oldest first.
    pub async fn recv(&self) -> Vec<u8> {
        loop {
            let notified = self.notify.notified();
            {
                let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = q.pop_front() {
                    return item;
                }
            }
            notified.await;
        }
    }

    /// Number of messages currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `true` if `id` had already been recorded.
    fn check_and_insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        false
    }
}

/// Result of a single [`SubscriberRegistry::broadcast`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peer ids the message was pushed to.
    pub delivered: Vec<String>,
    /// `true` if the broadcast was suppressed as a duplicate of a recent message id.
    pub suppressed: bool,
}

/// Registry of admitted peers for pose/status broadcasts.
#[derive(Debug)]
pub struct SubscriberRegistry {
    peers: Mutex<HashMap<String, Arc<PeerQueue>>>,
    recent: Mutex<RecentIds>,
    queue_depth: usize,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH, DEDUP_WINDOW)
    }
}

impl SubscriberRegistry {
    /// Creates a registry with the given per-peer queue depth and dedup window.
    pub fn new(queue_depth: usize, dedup_window: usize) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            recent: Mutex::new(RecentIds::new(dedup_window.max(1))),
            queue_depth,
        }
    }

    /// Admits a peer, returning the queue its writer task should drain.
    pub fn add(&self, id: impl Into<String>) -> Arc<PeerQueue> {
        let queue = Arc::new(PeerQueue::new(self.queue_depth));
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.into(), Arc::clone(&queue));
        queue
    }

    /// Evicts a peer, e.g. on socket close.
    pub fn remove(&self, id: &str) {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
    }

    /// Evicts a peer whose writer task reported a delivery deadline overrun.
    ///
    /// Returns `true` if the peer was present.
    pub fn mark_stale(&self, id: &str) -> bool {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    /// Number of currently admitted peers.
    pub fn len(&self) -> usize {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// `true` if no peers are admitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes `payload` onto every admitted peer's queue. If `message_id` is
    /// `Some` and matches a recently broadcast id, the call is a no-op
    /// (protects against redundant re-delivery after a reconnect replay).
    pub fn broadcast(&self, message_id: Option<&str>, payload: &[u8]) -> BroadcastReport {
        if let Some(id) = message_id {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if recent.check_and_insert(id) {
                return BroadcastReport {
                    delivered: Vec::new(),
                    suppressed: true,
                };
            }
        }
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = Vec::with_capacity(peers.len());
        for (id, queue) in peers.iter() {
            queue.push(payload.to_vec());
            delivered.push(id.clone());
        }
        BroadcastReport {
            delivered,
            suppressed: false,
        }
    }

    /// Pushes `payload` onto a single peer's queue, bypassing de-duplication.
    pub fn send_to(&self, id: &str, payload: &[u8]) -> bool {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        match peers.get(id) {
            Some(queue) => {
                queue.push(payload.to_vec());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_peer() {
        let reg = SubscriberRegistry::default();
        let qa = reg.add("a");
        let qb = reg.add("b");
        let report = reg.broadcast(None, b"hello");
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(qa.recv().await, b"hello");
        assert_eq!(qb.recv().await, b"hello");
    }

    #[test]
    fn duplicate_message_id_is_suppressed() {
        let reg = SubscriberRegistry::default();
        reg.add("a");
        let first = reg.broadcast(Some("msg-1"), b"x");
        let second = reg.broadcast(Some("msg-1"), b"y");
        assert!(!first.suppressed);
        assert!(second.suppressed);
    }

    #[test]
    fn full_queue_drops_oldest_not_newest() {
        let reg = SubscriberRegistry::new(2, DEDUP_WINDOW);
        reg.add("a");
        reg.broadcast(None, b"1");
        reg.broadcast(None, b"2");
        reg.broadcast(None, b"3");
        let peers = reg.peers.lock().unwrap();
        let q = peers.get("a").unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn mark_stale_evicts_peer() {
        let reg = SubscriberRegistry::default();
        reg.add("a");
        assert!(reg.mark_stale("a"));
        assert_eq!(reg.len(), 0);
        assert!(!reg.mark_stale("a"));
    }

    #[test]
    fn dedup_window_forgets_old_ids_once_full() {
        let reg = SubscriberRegistry::new(DEFAULT_QUEUE_DEPTH, 2);
        reg.add("a");
        reg.broadcast(Some("1"), b"a");
        reg.broadcast(Some("2"), b"b");
        reg.broadcast(Some("3"), b"c");
        let replay = reg.broadcast(Some("1"), b"a-again");
        assert!(!replay.suppressed);
    }
}
