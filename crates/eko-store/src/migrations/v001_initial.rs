//! v001 -- Initial schema creation.
//!
//! Ids are snowflakes bit-cast to `INTEGER`. Booleans are `0/1`. The
//! checks and triggers repeat the membership rules the server enforces, so
//! a write racing a permission change still fails inside the transaction.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           INTEGER PRIMARY KEY NOT NULL,
    public_key   BLOB NOT NULL UNIQUE CHECK (length(public_key) = 32),
    name         TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    is_public_dm INTEGER NOT NULL DEFAULT 1,
    is_deleted   INTEGER NOT NULL DEFAULT 0,
    is_banned    INTEGER NOT NULL DEFAULT 0     -- global, operator-set
);

-- ----------------------------------------------------------------
-- Networks
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS networks (
    id        INTEGER PRIMARY KEY NOT NULL,
    owner_id  INTEGER NOT NULL REFERENCES users(id),
    name      TEXT NOT NULL,
    icon      TEXT NOT NULL DEFAULT '',
    bg_hex    TEXT NOT NULL,
    fg_hex    TEXT NOT NULL,
    is_public INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_networks_owner ON networks(owner_id);

-- ----------------------------------------------------------------
-- Frequencies
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS frequencies (
    id         INTEGER PRIMARY KEY NOT NULL,
    network_id INTEGER NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
    name       TEXT NOT NULL,
    hex_color  TEXT NOT NULL,
    perms      INTEGER NOT NULL CHECK (perms IN (0, 1, 2)),
    position   INTEGER NOT NULL,

    UNIQUE (network_id, position)
);

-- ----------------------------------------------------------------
-- Members
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS members (
    network_id INTEGER NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
    user_id    INTEGER NOT NULL REFERENCES users(id),
    is_member  INTEGER NOT NULL DEFAULT 1,
    is_admin   INTEGER NOT NULL DEFAULT 0,
    is_muted   INTEGER NOT NULL DEFAULT 0,
    is_banned  INTEGER NOT NULL DEFAULT 0,
    ban_reason TEXT,

    PRIMARY KEY (network_id, user_id),
    CHECK ((is_banned = 1) = (ban_reason IS NOT NULL AND length(trim(ban_reason)) > 0)),
    CHECK (is_banned = 0 OR (is_member = 0 AND is_admin = 0))
);

CREATE INDEX IF NOT EXISTS idx_members_user ON members(user_id);

-- The owner's row can never lose membership or admin rights, or be banned.
CREATE TRIGGER IF NOT EXISTS trg_members_protect_owner
BEFORE UPDATE ON members
WHEN EXISTS (SELECT 1 FROM networks WHERE id = OLD.network_id AND owner_id = OLD.user_id)
 AND (NEW.is_member = 0 OR NEW.is_admin = 0 OR NEW.is_banned = 1)
BEGIN
    SELECT RAISE(ABORT, 'network owner membership is protected');
END;

-- Ownership only moves to an active admin of the same network.
CREATE TRIGGER IF NOT EXISTS trg_networks_owner_is_admin
BEFORE UPDATE OF owner_id ON networks
WHEN NOT EXISTS (
    SELECT 1 FROM members
    WHERE network_id = NEW.id AND user_id = NEW.owner_id
      AND is_member = 1 AND is_admin = 1 AND is_banned = 0
)
BEGIN
    SELECT RAISE(ABORT, 'new owner must be an admin of the network');
END;

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           INTEGER PRIMARY KEY NOT NULL,
    sender_id    INTEGER NOT NULL REFERENCES users(id),
    frequency_id INTEGER REFERENCES frequencies(id) ON DELETE CASCADE,
    receiver_id  INTEGER REFERENCES users(id),
    content      TEXT NOT NULL,
    ping_kind    INTEGER,                       -- 0 everyone, 1 admins, 2 user
    ping_user_id INTEGER,
    is_edited    INTEGER NOT NULL DEFAULT 0,
    is_deleted   INTEGER NOT NULL DEFAULT 0,

    CHECK ((frequency_id IS NULL) <> (receiver_id IS NULL)),
    CHECK ((ping_kind = 2) = (ping_user_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_messages_frequency
    ON messages(frequency_id, id DESC);
CREATE INDEX IF NOT EXISTS idx_messages_dm
    ON messages(sender_id, receiver_id, id DESC);

-- ----------------------------------------------------------------
-- Trust (snapshot of the key the truster confirmed)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS trust (
    truster_id  INTEGER NOT NULL REFERENCES users(id),
    trusted_id  INTEGER NOT NULL REFERENCES users(id),
    trusted_key BLOB NOT NULL CHECK (length(trusted_key) = 32),

    PRIMARY KEY (truster_id, trusted_id),
    CHECK (truster_id <> trusted_id)
);

-- ----------------------------------------------------------------
-- Blocks
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS blocks (
    blocker_id INTEGER NOT NULL REFERENCES users(id),
    blocked_id INTEGER NOT NULL REFERENCES users(id),

    PRIMARY KEY (blocker_id, blocked_id),
    CHECK (blocker_id <> blocked_id)
);

CREATE INDEX IF NOT EXISTS idx_blocks_blocked ON blocks(blocked_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
