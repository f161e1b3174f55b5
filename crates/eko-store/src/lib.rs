//! # eko-store
//!
//! Server-side persistence for Eko, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`. Every query runs inside
//! [`Database::transaction`] through the typed helpers on [`Tx`], one
//! module per entity.

pub mod blocks;
pub mod database;
pub mod frequencies;
pub mod members;
pub mod messages;
pub mod migrations;
pub mod networks;
pub mod trust;
pub mod users;

mod error;

#[cfg(test)]
mod test_support;

pub use database::{Database, Tx};
pub use error::{Result, StoreError};
pub use users::AccountStatus;
