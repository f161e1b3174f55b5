use std::sync::Arc;

use eko_server::api::{self, AppState};
use eko_server::metrics::start_metrics_server;
use eko_server::server::{load_tls_config, run_with_shutdown, spawn_maintenance};
use eko_server::{ServerConfig, ServerState, Store};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,eko_server=debug")),
        )
        .init();

    info!("Starting Eko server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        node_id = config.node_id,
        admin_enabled = config.admin_token.is_some(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = Store::open(&config.db_path, config.node_id)?;
    info!(path = %config.db_path.display(), "Opened database");

    let tls = load_tls_config(&config.tls_cert, &config.tls_key)?;
    let acceptor = TlsAcceptor::from(tls);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let http_addr = config.http_addr;
    let metrics_addr = config.metrics_addr;

    let state = Arc::new(ServerState::new(config, store));
    let (shutdown_tx, _) = tokio::sync::watch::channel(());

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let metrics_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr, metrics_shutdown).await {
            warn!(error = %e, "Metrics server error");
        }
    });

    let app_state = AppState::new(Arc::clone(&state));
    let api_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(e) = api::serve(app_state, http_addr, api_shutdown).await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    });

    let maintenance = spawn_maintenance(Arc::clone(&state), shutdown_tx.subscribe());

    // -----------------------------------------------------------------------
    // 5. Run the packet server until Ctrl+C
    // -----------------------------------------------------------------------
    let mut server = tokio::spawn(run_with_shutdown(
        listener,
        acceptor,
        Arc::clone(&state),
        shutdown_tx.subscribe(),
    ));

    tokio::select! {
        result = &mut server => {
            let _ = shutdown_tx.send(());
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    let _ = shutdown_tx.send(());
    server.await??;
    let _ = maintenance.await;

    Ok(())
}
