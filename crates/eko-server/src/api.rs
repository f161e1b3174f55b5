use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Json, Router,
};
use eko_shared::Id;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::server::ServerState;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<ServerState>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(server: Arc<ServerState>) -> Self {
        Self {
            server,
            rate_limiter: RateLimiter::default(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/admin/status", get(admin_status))
        .route("/admin/ban-user", post(admin_ban_user))
        .route("/admin/unban-user", post(admin_unban_user))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    protocol_version: u8,
    port: u16,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    name: String,
    uptime_secs: u64,
    connections: usize,
    sessions: usize,
    users_online: usize,
    users: u64,
    networks: u64,
}

#[derive(Deserialize)]
struct AdminBanRequest {
    user_id: Id,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    let config = &state.server.config;
    Json(ServerInfoResponse {
        name: config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        protocol_version: eko_shared::constants::PROTOCOL_VERSION,
        port: config.listen_addr.port(),
    })
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no EKO_ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.server.config)?;

    let server = &state.server;
    let (users, networks) = server
        .store
        .transact(|tx| Ok((tx.count_users()?, tx.count_networks()?)))
        .await?;

    Ok(Json(AdminStatusResponse {
        name: server.config.instance_name.clone(),
        uptime_secs: server.uptime().as_secs(),
        connections: server
            .active_connections
            .load(std::sync::atomic::Ordering::Relaxed),
        sessions: server.registry.session_count(),
        users_online: server.registry.online_users(),
        users,
        networks,
    }))
}

async fn admin_ban_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<AdminBanRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.server.config)?;

    set_global_ban(&state.server, req.user_id, true).await?;
    let closed = state.server.registry.close_user(req.user_id);

    info!(user_id = %req.user_id, sessions_closed = closed, "Admin banned user");
    Ok(Json(serde_json::json!({ "banned": true, "sessions_closed": closed })))
}

async fn admin_unban_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<AdminBanRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.server.config)?;

    set_global_ban(&state.server, req.user_id, false).await?;

    info!(user_id = %req.user_id, "Admin unbanned user");
    Ok(Json(serde_json::json!({ "banned": false })))
}

async fn set_global_ban(
    server: &ServerState,
    user_id: Id,
    banned: bool,
) -> Result<(), ServerError> {
    let found = server
        .store
        .transact(move |tx| Ok(tx.set_global_ban(user_id, banned)?))
        .await?;
    if !found {
        return Err(ServerError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

/// Serve the informational and admin API until `shutdown` fires.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<()>,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    })
    .await?;

    Ok(())
}
