//! Shared server state, TLS setup and the packet-protocol accept loop.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use eko_shared::Id;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::error::ServerError;
use crate::fanout::Fanout;
use crate::metrics;
use crate::rate_limit::{ConnectClass, ConnectLimiter, RateLimiter};
use crate::registry::Registry;
use crate::store::Store;

/// How long shutdown waits for connections to wind down.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Request buckets idle this long are full again and can be forgotten.
const BUCKET_IDLE_SECS: f64 = 600.0;

/// Everything a connection needs, shared across tasks.
pub struct ServerState {
    pub config: ServerConfig,
    pub store: Store,
    pub registry: Arc<Registry>,
    pub fanout: Fanout,
    /// Per-user bucket for mutating requests.
    pub request_limiter: RateLimiter<Id>,
    pub connect_limiter: ConnectLimiter,
    /// Admitted TCP connections, authenticated or not.
    pub active_connections: AtomicUsize,
    next_conn_id: AtomicU64,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(config: ServerConfig, store: Store) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            fanout: Fanout::new(Arc::clone(&registry), config.write_timeout),
            registry,
            request_limiter: RateLimiter::new(config.request_rate, config.request_burst),
            connect_limiter: ConnectLimiter::new(
                config.suspicious_connects,
                config.malicious_connects,
                config.connect_cooldown,
            ),
            active_connections: AtomicUsize::new(0),
            next_conn_id: AtomicU64::new(1),
            started_at: Instant::now(),
            store,
            config,
        }
    }

    /// Process-unique connection id.
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Build the rustls server configuration from PEM files.
///
/// # Errors
///
/// Returns an error if either file is unreadable, holds no usable
/// certificate or key, or the pair is rejected by rustls.
pub fn load_tls_config(
    cert_path: &Path,
    key_path: &Path,
) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let mut cert_reader = BufReader::new(
        File::open(cert_path)
            .with_context(|| format!("opening certificate {}", cert_path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certificate {}", cert_path.display()))?;
    if certs.is_empty() {
        anyhow::bail!("no certificate found in {}", cert_path.display());
    }

    let mut key_reader = BufReader::new(
        File::open(key_path).with_context(|| format!("opening key {}", key_path.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("parsing key {}", key_path.display()))?
        .with_context(|| format!("no private key found in {}", key_path.display()))?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .context("selecting TLS versions")?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .context("installing certificate")?;
    Ok(Arc::new(config))
}

/// Accept TLS connections until `shutdown` fires, then close every
/// session and wait for the connection tasks to finish.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), ServerError> {
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "Packet server listening");
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                if !admit(&state, peer) {
                    drop(stream);
                    continue;
                }
                tasks.spawn(handle_tcp(
                    stream,
                    peer,
                    acceptor.clone(),
                    Arc::clone(&state),
                    shutdown.clone(),
                ));
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    info!(connections = tasks.len(), "Shutdown signal received, draining connections");
    state.registry.close_all();
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(remaining = tasks.len(), "Drain timeout reached, aborting connections");
        tasks.abort_all();
    }

    info!("Packet server shut down");
    Ok(())
}

/// Connect-rate and capacity gate, applied before any TLS work.
fn admit(state: &ServerState, peer: SocketAddr) -> bool {
    if state.connect_limiter.classify(peer.ip()) == ConnectClass::Refused {
        metrics::counters::connections_total("rejected_cooldown");
        metrics::counters::rate_limited_total("connect");
        return false;
    }

    let max = state.config.max_connections;
    if max > 0 && state.active_connections.load(Ordering::Relaxed) >= max {
        warn!(%peer, max, "Max connections reached, rejecting");
        metrics::counters::connections_total("rejected_capacity");
        return false;
    }
    true
}

async fn handle_tcp(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    state: Arc<ServerState>,
    shutdown: watch::Receiver<()>,
) {
    let auth_deadline = tokio::time::Instant::now() + state.config.auth_timeout;
    state.active_connections.fetch_add(1, Ordering::Relaxed);
    metrics::gauges::inc_connections_active();
    let _ = stream.set_nodelay(true);

    // TLS and the challenge/response share one deadline from accept.
    match tokio::time::timeout_at(auth_deadline, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => {
            metrics::counters::connections_total("accepted");
            let served =
                serve_connection(tls, peer, Arc::clone(&state), auth_deadline, shutdown).await;
            if let Err(e) = served {
                debug!(%peer, error = %e, "Connection ended with error");
            }
        }
        Ok(Err(e)) => {
            metrics::counters::connections_total("tls_failed");
            debug!(%peer, error = %e, "TLS handshake failed");
        }
        Err(_) => {
            metrics::counters::connections_total("tls_failed");
            debug!(%peer, "TLS handshake timed out");
        }
    }

    state.active_connections.fetch_sub(1, Ordering::Relaxed);
    metrics::gauges::dec_connections_active();
}

/// Periodic cleanup of limiter state and idle conversation locks.
pub fn spawn_maintenance(
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            state.request_limiter.purge_stale(BUCKET_IDLE_SECS).await;
            state.connect_limiter.purge_stale();
            state.fanout.purge_idle_locks();
            let buckets = state.request_limiter.tracked().await;
            debug!(
                buckets,
                connect_windows = state.connect_limiter.tracked(),
                locks = state.fanout.lock_count(),
                sessions = state.registry.session_count(),
                "Maintenance pass"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn state() -> ServerState {
        ServerState::new(ServerConfig::default(), Store::in_memory(0).unwrap())
    }

    #[test]
    fn test_conn_ids_are_unique() {
        let state = state();
        let a = state.next_conn_id();
        let b = state.next_conn_id();
        assert_ne!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn test_capacity_gate() {
        let mut config = ServerConfig::default();
        config.max_connections = 1;
        let state = ServerState::new(config, Store::in_memory(0).unwrap());
        let peer: SocketAddr = ([10, 0, 0, 1], 5000).into();

        assert!(admit(&state, peer));
        state.active_connections.store(1, Ordering::Relaxed);
        assert!(!admit(&state, peer));
    }

    #[test]
    fn test_connect_flood_is_refused() {
        let state = state();
        let peer: SocketAddr = ([10, 0, 0, 2], 5000).into();
        let admitted = (0..20).filter(|_| admit(&state, peer)).count();
        assert_eq!(admitted, state.config.malicious_connects - 1);
    }

    #[tokio::test]
    async fn test_maintenance_stops_on_shutdown() {
        let state = Arc::new(state());
        state.request_limiter.check(&Id(1)).await;
        let (tx, rx) = watch::channel(());
        let task = spawn_maintenance(Arc::clone(&state), rx);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("maintenance did not stop")
            .unwrap();
        assert_eq!(state.request_limiter.tracked().await, 1);
    }

    #[test]
    fn test_tls_config_rejects_missing_or_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");
        assert!(load_tls_config(&missing, &missing).is_err());

        let empty = dir.path().join("empty.pem");
        File::create(&empty).unwrap().write_all(b"").unwrap();
        let err = load_tls_config(&empty, &empty).unwrap_err();
        assert!(err.to_string().contains("no certificate"));
    }
}
