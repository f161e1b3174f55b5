//! Push delivery.
//!
//! A push is encoded at most once per wire encoding and queued to every
//! target session concurrently. Sessions that cannot take it within the
//! write timeout are evicted; the others are not held up.
//!
//! Message pushes for one conversation are serialized through a
//! per-destination lock which the sending handler holds from id allocation
//! until the push is queued, so every recipient sees new messages of a
//! destination in id order.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use eko_shared::{Destination, Encoding, Id, Packet, Payload};
use futures::future::join_all;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::metrics;
use crate::registry::Registry;
use crate::session::{EnqueueError, Session};

/// Ordering domain for message pushes. A DM thread is one domain no matter
/// which participant sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversation {
    Channel(Id),
    Dm(Id, Id),
}

impl Conversation {
    pub fn of(sender: Id, destination: Destination) -> Self {
        match destination {
            Destination::Channel(frequency_id) => Conversation::Channel(frequency_id),
            Destination::Dm(peer) => Conversation::Dm(sender.min(peer), sender.max(peer)),
        }
    }
}

pub struct Fanout {
    registry: Arc<Registry>,
    locks: DashMap<Conversation, Arc<Mutex<()>>>,
    write_timeout: Duration,
}

impl Fanout {
    pub fn new(registry: Arc<Registry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            locks: DashMap::new(),
            write_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Take the ordering lock of a conversation.
    pub async fn lock(&self, conversation: Conversation) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(conversation).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on.
    pub fn purge_idle_locks(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Push to one session.
    pub async fn to_session(&self, session: &Arc<Session>, payload: &Payload) -> bool {
        self.deliver(std::slice::from_ref(session), payload).await == 1
    }

    /// Push to every session of the given users.
    pub async fn to_users(&self, users: &[Id], payload: &Payload) -> usize {
        let mut users = users.to_vec();
        users.sort_unstable();
        users.dedup();
        let sessions: Vec<Arc<Session>> = users
            .iter()
            .flat_map(|user| self.registry.sessions_of(*user))
            .collect();
        self.deliver(&sessions, payload).await
    }

    /// Push a network-scoped update to the sessions of `members` that are
    /// subscribed to the network.
    pub async fn to_network(&self, network_id: Id, members: &[Id], payload: &Payload) -> usize {
        let sessions = self.registry.sessions_for_network(network_id, members);
        self.deliver(&sessions, payload).await
    }

    /// Queue `payload` to all `sessions` concurrently. Returns how many
    /// accepted it.
    pub async fn deliver(&self, sessions: &[Arc<Session>], payload: &Payload) -> usize {
        if sessions.is_empty() {
            return 0;
        }

        let mut cache = EncodedCache::default();
        let mut queued = Vec::with_capacity(sessions.len());
        for session in sessions {
            if let Some(bytes) = cache.get(session.encoding(), payload) {
                queued.push((session, bytes));
            }
        }

        let timeout = self.write_timeout;
        let results = join_all(queued.into_iter().map(|(session, bytes)| async move {
            let result = session.enqueue(bytes, timeout).await;
            (session, result)
        }))
        .await;

        let mut delivered = 0;
        for (session, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => self.registry.evict(session, "slow_consumer"),
                Err(EnqueueError::Closed) => self.registry.evict(session, "closed"),
            }
        }

        metrics::counters::pushes_total(payload.kind().name(), delivered as u64);
        delivered
    }
}

/// Wire bytes of one payload, encoded lazily per encoding.
#[derive(Default)]
struct EncodedCache {
    json: Option<Option<Bytes>>,
    msgpack: Option<Option<Bytes>>,
}

impl EncodedCache {
    fn get(&mut self, encoding: Encoding, payload: &Payload) -> Option<Bytes> {
        let slot = match encoding {
            Encoding::Json => &mut self.json,
            Encoding::MsgPack => &mut self.msgpack,
        };
        slot.get_or_insert_with(|| match Packet::new(encoding, payload) {
            Ok(packet) => Some(packet.to_bytes()),
            Err(e) => {
                tracing::error!(
                    kind = payload.kind().name(),
                    error = %e,
                    "Push does not fit in a packet"
                );
                None
            }
        })
        .clone()
    }
}
