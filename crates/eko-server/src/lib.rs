//! # eko-server
//!
//! Central server for the Eko network.
//!
//! - **Packet protocol** over TLS: Ed25519 challenge/response login, framed
//!   JSON or MessagePack requests, replies and pushes
//! - **Sessions and registry** tracking every live connection per user
//! - **Handlers** for networks, frequencies, members, messages, trust and
//!   blocks, each checked by the authorizer and run in one store transaction
//! - **Fan-out** of state changes to the sessions that can see them
//! - **HTTP API** (axum) for health, instance info and operator actions,
//!   plus a Prometheus scrape endpoint

#![forbid(unsafe_code)]

pub mod api;
pub mod auth;
pub mod authorizer;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{run_with_shutdown, ServerState};
pub use store::Store;
