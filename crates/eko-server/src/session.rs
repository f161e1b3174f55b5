//! One authenticated connection.
//!
//! A [`Session`] is shared between the connection's reader loop, its writer
//! task, the registry and any fan-out in flight. Outbound packets go through
//! a small bounded queue drained by the writer; a session whose queue stays
//! full past the write timeout is evicted rather than allowed to stall the
//! producer.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use eko_shared::{Encoding, Id, PublicKey};
use tokio::sync::{mpsc, watch};

/// Packets a session may have queued before enqueues start to wait.
pub const OUTBOUND_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue stayed full for the whole write timeout.
    Full,
    /// The writer is gone.
    Closed,
}

pub struct Session {
    pub conn_id: u64,
    pub user_id: Id,
    pub public_key: PublicKey,
    pub remote: SocketAddr,
    pub connected_at: Instant,
    outbound: mpsc::Sender<Bytes>,
    subscriptions: Mutex<HashSet<Id>>,
    /// Encoding tag of the last request; pushes reuse it.
    encoding: AtomicU8,
    strikes: AtomicU32,
    close_after_reply: AtomicBool,
    closed: watch::Sender<bool>,
}

impl Session {
    pub fn new(
        conn_id: u64,
        user_id: Id,
        public_key: PublicKey,
        remote: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            conn_id,
            user_id,
            public_key,
            remote,
            connected_at: Instant::now(),
            outbound,
            subscriptions: Mutex::new(HashSet::new()),
            encoding: AtomicU8::new(Encoding::Json.tag()),
            strikes: AtomicU32::new(0),
            close_after_reply: AtomicBool::new(false),
            closed,
        }
    }

    pub fn encoding(&self) -> Encoding {
        Encoding::from_tag(self.encoding.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set_encoding(&self, encoding: Encoding) {
        self.encoding.store(encoding.tag(), Ordering::Relaxed);
    }

    // -- subscriptions -----------------------------------------------------

    fn subscriptions(&self) -> std::sync::MutexGuard<'_, HashSet<Id>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` if already subscribed.
    pub fn subscribe(&self, network_id: Id) -> bool {
        self.subscriptions().insert(network_id)
    }

    pub fn unsubscribe(&self, network_id: Id) -> bool {
        self.subscriptions().remove(&network_id)
    }

    pub fn is_subscribed(&self, network_id: Id) -> bool {
        self.subscriptions().contains(&network_id)
    }

    pub fn set_subscriptions(&self, networks: impl IntoIterator<Item = Id>) {
        let mut subs = self.subscriptions();
        subs.clear();
        subs.extend(networks);
    }

    pub fn subscribed_networks(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.subscriptions().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    // -- outbound ----------------------------------------------------------

    /// Queue wire bytes for the writer, waiting at most `timeout` for room.
    pub async fn enqueue(&self, bytes: Bytes, timeout: Duration) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.outbound
            .send_timeout(bytes, timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => EnqueueError::Full,
                mpsc::error::SendTimeoutError::Closed(_) => EnqueueError::Closed,
            })
    }

    // -- rate limit strikes ------------------------------------------------

    /// Count one more consecutive rate-limited request.
    pub fn record_strike(&self) -> u32 {
        self.strikes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_strikes(&self) {
        self.strikes.store(0, Ordering::Relaxed);
    }

    // -- lifecycle ---------------------------------------------------------

    /// Ask the reader to stop once the current reply has been queued.
    pub fn close_after_reply(&self) {
        self.close_after_reply.store(true, Ordering::Release);
    }

    pub fn should_close_after_reply(&self) -> bool {
        self.close_after_reply.load(Ordering::Acquire)
    }

    /// Cancel the session. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("conn_id", &self.conn_id)
            .field("user_id", &self.user_id)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Session plus the receiving end of its queue, for tests.
#[cfg(test)]
pub(crate) fn test_session(
    conn_id: u64,
    user_id: Id,
) -> (std::sync::Arc<Session>, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let session = Session::new(
        conn_id,
        user_id,
        [user_id.0 as u8; 32],
        ([127, 0, 0, 1], 40000 + conn_id as u16).into(),
        tx,
    );
    (std::sync::Arc::new(session), rx)
}
