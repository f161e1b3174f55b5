//! Lifecycle of one connection after the transport handshake:
//! authenticate, register, sync, then read requests until the client goes
//! away, the session is cancelled or the server shuts down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use eko_shared::protocol::{FrequenciesInfo, NetworksInfo, UserProfileInfo};
use eko_shared::{Encoding, Framer, Packet, Payload, User};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::auth::authenticate;
use crate::dispatcher::dispatch;
use crate::error::ServerError;
use crate::metrics;
use crate::server::ServerState;
use crate::session::{EnqueueError, Session, OUTBOUND_CAPACITY};

const READ_CHUNK: usize = 16 * 1024;

/// How long the writer gets to flush what is queued once the session ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Best-effort delivery of a final error before the socket is dropped.
const REJECT_GRACE: Duration = Duration::from_millis(500);

/// Drive one connection to completion. The handshake must finish by
/// `auth_deadline`, which the caller takes at accept time so that any
/// transport handshake before this point counts against it.
///
/// # Errors
///
/// Returns the error that ended the connection: a failed or timed-out
/// handshake, a protocol violation, or an I/O failure. Orderly ends
/// (client hang-up, eviction, shutdown) are `Ok`.
pub async fn serve_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    state: Arc<ServerState>,
    auth_deadline: tokio::time::Instant,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let started = Instant::now();
    let handshake = tokio::time::timeout_at(
        auth_deadline,
        authenticate(&mut stream, &state.store, state.config.nonce_lifetime),
    )
    .await;

    let user = match handshake {
        Ok(Ok(user)) => {
            metrics::counters::auth_total("ok");
            metrics::histograms::auth_latency_seconds(started.elapsed().as_secs_f64());
            user
        }
        Ok(Err(err)) => {
            metrics::counters::auth_total("failed");
            debug!(%peer, error = %err, "Handshake failed");
            reject(&mut stream, &err).await;
            return Err(err);
        }
        Err(_) => {
            metrics::counters::auth_total("timeout");
            debug!(%peer, "Handshake timed out");
            let err = ServerError::Timeout;
            reject(&mut stream, &err).await;
            return Err(err);
        }
    };

    let (outbound, queue) = mpsc::channel(OUTBOUND_CAPACITY);
    let session = Arc::new(Session::new(
        state.next_conn_id(),
        user.id,
        user.public_key,
        peer,
        outbound,
    ));
    state
        .registry
        .add(Arc::clone(&session))
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    info!(conn_id = session.conn_id, user_id = %user.id, %peer, "Session established");

    let (reader, writer) = tokio::io::split(stream);
    let writer_task = tokio::spawn(write_loop(writer, queue, Arc::clone(&session)));

    let result = match initial_sync(&state, &session, user).await {
        Ok(()) => read_loop(reader, &state, &session, &mut shutdown).await,
        Err(err) => Err(err),
    };

    state.registry.remove(&session);
    session.close();
    if tokio::time::timeout(WRITER_DRAIN, writer_task).await.is_err() {
        debug!(conn_id = session.conn_id, "Writer did not finish in time");
    }

    info!(
        conn_id = session.conn_id,
        user_id = %session.user_id,
        duration_secs = session.connected_at.elapsed().as_secs(),
        "Session closed"
    );
    result
}

/// Send the profile, the networks and their frequencies so a client that
/// just (re)connected holds the current state.
///
/// Subscriptions are replaced inside the transaction that reads them.
/// Membership handlers only touch subscriptions after their own commit, so a
/// concurrent join or ban always lands on top of this snapshot.
async fn initial_sync(
    state: &ServerState,
    session: &Arc<Session>,
    user: User,
) -> Result<(), ServerError> {
    let user_id = user.id;
    let subscriber = Arc::clone(session);
    let (networks, frequencies) = state
        .store
        .transact(move |tx| {
            let networks = tx.networks_of_user(user_id)?;
            let mut frequencies = Vec::with_capacity(networks.len());
            for network in &networks {
                frequencies.push(FrequenciesInfo {
                    network_id: network.id,
                    frequencies: tx.list_frequencies(network.id)?,
                    removed: Vec::new(),
                });
            }
            subscriber.set_subscriptions(networks.iter().map(|n| n.id));
            Ok((networks, frequencies))
        })
        .await?;

    let mut pushes: Vec<Payload> = Vec::with_capacity(2 + frequencies.len());
    pushes.push(UserProfileInfo { users: vec![user] }.into());
    pushes.push(
        NetworksInfo {
            networks,
            removed: Vec::new(),
            set: true,
        }
        .into(),
    );
    pushes.extend(frequencies.into_iter().map(Payload::from));

    for payload in pushes {
        if !state.fanout.to_session(session, &payload).await {
            return Ok(());
        }
    }
    Ok(())
}

async fn read_loop<R>(
    mut reader: R,
    state: &ServerState,
    session: &Arc<Session>,
    shutdown: &mut watch::Receiver<()>,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut framer = Framer::new();
    let mut closed = session.closed_signal();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        if session.is_closed() {
            return Ok(());
        }

        let n = tokio::select! {
            read = reader.read(&mut buf) => read?,
            _ = closed.changed() => continue,
            _ = shutdown.changed() => {
                debug!(conn_id = session.conn_id, "Closing for shutdown");
                return Ok(());
            }
        };
        if n == 0 {
            return Ok(());
        }

        let packets: Vec<_> = framer.feed(&buf[..n]).collect();
        for item in packets {
            let packet = match item {
                Ok(packet) => packet,
                Err(e) => {
                    let err = ServerError::ProtocolViolation(e.to_string());
                    warn!(conn_id = session.conn_id, error = %e, "Framing error, closing");
                    respond(state, session, err.to_error_info().into()).await;
                    return Err(err);
                }
            };

            let outcome = dispatch(state, session, packet).await;
            if !respond(state, session, outcome.response).await {
                return Ok(());
            }
            if outcome.close || session.should_close_after_reply() {
                return Ok(());
            }
        }
    }
}

/// Queue a direct reply. Returns `false` if the session is gone.
async fn respond(state: &ServerState, session: &Arc<Session>, response: Payload) -> bool {
    let encoding = session.encoding();
    let packet = Packet::new(encoding, &response).or_else(|e| {
        let kind = response.kind().name();
        let err = ServerError::Internal(format!("{kind} reply does not fit: {e}"));
        Packet::new(encoding, &err.to_error_info().into())
    });
    let Ok(packet) = packet else {
        return false;
    };

    match session
        .enqueue(packet.to_bytes(), state.config.write_timeout)
        .await
    {
        Ok(()) => true,
        Err(EnqueueError::Full) => {
            state.registry.evict(session, "slow_consumer");
            false
        }
        Err(EnqueueError::Closed) => false,
    }
}

/// Drain the session queue onto the socket until the session closes, then
/// flush whatever is still queued.
async fn write_loop<W>(mut writer: W, mut queue: mpsc::Receiver<Bytes>, session: Arc<Session>)
where
    W: AsyncWrite + Unpin,
{
    let mut closed = session.closed_signal();
    loop {
        if session.is_closed() {
            break;
        }
        tokio::select! {
            biased;
            next = queue.recv() => {
                let Some(bytes) = next else { break };
                if let Err(e) = write_packet(&mut writer, &bytes).await {
                    debug!(conn_id = session.conn_id, error = %e, "Write failed, closing session");
                    session.close();
                    return;
                }
            }
            _ = closed.changed() => {}
        }
    }

    while let Ok(bytes) = queue.try_recv() {
        if write_packet(&mut writer, &bytes).await.is_err() {
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn reject<S: AsyncWrite + Unpin>(stream: &mut S, err: &ServerError) {
    let Ok(packet) = Packet::new(Encoding::Json, &err.to_error_info().into()) else {
        return;
    };
    let _ = tokio::time::timeout(REJECT_GRACE, async {
        write_packet(stream, &packet.to_bytes()).await?;
        stream.shutdown().await
    })
    .await;
}
