//! Entity types shared by the store, the server and clients.
//!
//! These double as wire shapes: push payloads carry them as-is.

use serde::{Deserialize, Serialize};

use crate::id::Id;

/// Raw Ed25519 public key. Identity of a user.
pub type PublicKey = [u8; 32];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub description: String,
    #[serde(with = "hex::serde")]
    pub public_key: PublicKey,
    pub is_public_dm: bool,
    pub is_deleted: bool,
}

impl User {
    /// Short key prefix for logs.
    pub fn short_key(&self) -> String {
        hex::encode(&self.public_key[..4])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    pub id: Id,
    pub owner_id: Id,
    pub name: String,
    pub icon: String,
    pub bg_hex: String,
    pub fg_hex: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyPerms {
    NoAccess,
    Read,
    ReadWrite,
}

impl FrequencyPerms {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::NoAccess => 0,
            Self::Read => 1,
            Self::ReadWrite => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::NoAccess),
            1 => Some(Self::Read),
            2 => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frequency {
    pub id: Id,
    pub network_id: Id,
    pub name: String,
    pub hex_color: String,
    pub perms: FrequencyPerms,
    pub position: u32,
}

/// The (network, user) relation.
///
/// A banned user keeps a row with `is_member = false` so the ban outlives
/// the membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub network_id: Id,
    pub user_id: Id,
    pub is_member: bool,
    pub is_admin: bool,
    pub is_muted: bool,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
}

impl Member {
    /// Member in good standing: present and not banned.
    pub fn is_active(&self) -> bool {
        self.is_member && !self.is_banned
    }

    pub fn is_active_admin(&self) -> bool {
        self.is_active() && self.is_admin
    }
}

/// Where a message lives: a signal with one peer, or a frequency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Destination {
    Dm(Id),
    Channel(Id),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Ping {
    Everyone,
    Admins,
    User(Id),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Id,
    pub sender_id: Id,
    pub destination: Destination,
    pub content: String,
    pub ping: Option<Ping>,
    pub edited: bool,
    pub deleted: bool,
}

impl Message {
    pub fn frequency_id(&self) -> Option<Id> {
        match self.destination {
            Destination::Channel(id) => Some(id),
            Destination::Dm(_) => None,
        }
    }

    /// The other participant of a DM, seen from `viewer`.
    pub fn dm_peer(&self, viewer: Id) -> Option<Id> {
        match self.destination {
            Destination::Dm(receiver) if receiver == viewer => Some(self.sender_id),
            Destination::Dm(receiver) if self.sender_id == viewer => Some(receiver),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatus {
    /// The snapshot still matches the user's current key.
    Trusted,
    /// The user's key changed since it was trusted.
    KeyMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustEntry {
    pub user_id: Id,
    #[serde(with = "hex::serde")]
    pub trusted_key: PublicKey,
    pub status: TrustStatus,
}
