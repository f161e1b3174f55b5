use eko_shared::Id;
use rusqlite::params;

use crate::database::Tx;
use crate::error::{Result, StoreError};

impl Tx<'_> {
    /// Returns `true` only when the edge is new.
    pub fn add_block(&self, blocker: Id, blocked: Id) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id) VALUES (?1, ?2)",
            params![blocker.as_i64(), blocked.as_i64()],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_block(&self, blocker: Id, blocked: Id) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![blocker.as_i64(), blocked.as_i64()],
        )?;
        Ok(affected > 0)
    }

    pub fn is_blocked(&self, blocker: Id, blocked: Id) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS (SELECT 1 FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2)",
            params![blocker.as_i64(), blocked.as_i64()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Users `blocker` has blocked.
    pub fn blocked_by(&self, blocker: Id) -> Result<Vec<Id>> {
        self.block_query(
            "SELECT blocked_id FROM blocks WHERE blocker_id = ?1 ORDER BY blocked_id ASC",
            blocker,
        )
    }

    /// Users who have blocked `blocked`. Fan-out skips them.
    pub fn blockers_of(&self, blocked: Id) -> Result<Vec<Id>> {
        self.block_query(
            "SELECT blocker_id FROM blocks WHERE blocked_id = ?1 ORDER BY blocker_id ASC",
            blocked,
        )
    }

    fn block_query(&self, sql: &str, user: Id) -> Result<Vec<Id>> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        let rows = stmt.query_map(params![user.as_i64()], |row| Ok(Id::from_i64(row.get(0)?)))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }
}
