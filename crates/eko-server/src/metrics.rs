use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;

/// Install the global Prometheus recorder and serve `/metrics` until the
/// shutdown signal fires.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or binding the
/// metrics HTTP server fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    mut shutdown: watch::Receiver<()>,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

/// Live-object gauges.
pub mod gauges {
    pub fn inc_connections_active() {
        metrics::gauge!("eko_connections_active").increment(1.0);
    }

    pub fn dec_connections_active() {
        metrics::gauge!("eko_connections_active").decrement(1.0);
    }

    /// Authenticated sessions currently registered.
    pub fn sessions_active(count: usize) {
        metrics::gauge!("eko_sessions_active").set(count as f64);
    }

    pub fn users_online(count: usize) {
        metrics::gauge!("eko_users_online").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Accept-loop outcome: `accepted`, `rejected_cooldown`, `rejected_capacity`
    /// or `tls_failed`.
    pub fn connections_total(status: &'static str) {
        metrics::counter!("eko_connections_total", "status" => status).increment(1);
    }

    /// Handshake outcome: `ok`, `timeout` or `failed`.
    pub fn auth_total(result: &'static str) {
        metrics::counter!("eko_auth_total", "result" => result).increment(1);
    }

    pub fn requests_total(kind: &'static str, code: &'static str) {
        metrics::counter!("eko_requests_total", "kind" => kind, "code" => code).increment(1);
    }

    pub fn pushes_total(kind: &'static str, sessions: u64) {
        metrics::counter!("eko_pushes_total", "kind" => kind).increment(sessions);
    }

    pub fn evictions_total(reason: &'static str) {
        metrics::counter!("eko_evictions_total", "reason" => reason).increment(1);
    }

    /// `scope` is `connect`, `request` or `http`.
    pub fn rate_limited_total(scope: &'static str) {
        metrics::counter!("eko_rate_limited_total", "scope" => scope).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    pub fn handler_latency_seconds(kind: &'static str, value: f64) {
        metrics::histogram!("eko_handler_latency_seconds", "kind" => kind).record(value);
    }

    pub fn auth_latency_seconds(value: f64) {
        metrics::histogram!("eko_auth_latency_seconds").record(value);
    }
}
