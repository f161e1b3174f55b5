use eko_shared::{Id, Member};
use rusqlite::{params, OptionalExtension};

use crate::database::Tx;
use crate::error::{Result, StoreError};

const MEMBER_COLUMNS: &str =
    "network_id, user_id, is_member, is_admin, is_muted, is_banned, ban_reason";

impl Tx<'_> {
    pub fn get_member(&self, network_id: Id, user_id: Id) -> Result<Option<Member>> {
        let member = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MEMBER_COLUMNS} FROM members WHERE network_id = ?1 AND user_id = ?2"
                ),
                params![network_id.as_i64(), user_id.as_i64()],
                row_to_member,
            )
            .optional()?;
        Ok(member)
    }

    /// Insert or overwrite the (network, user) row. The owner-protection
    /// trigger and the ban checks apply to the overwrite.
    pub fn upsert_member(&self, member: &Member) -> Result<()> {
        self.conn().execute(
            "INSERT INTO members
                (network_id, user_id, is_member, is_admin, is_muted, is_banned, ban_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (network_id, user_id) DO UPDATE SET
                is_member = excluded.is_member,
                is_admin = excluded.is_admin,
                is_muted = excluded.is_muted,
                is_banned = excluded.is_banned,
                ban_reason = excluded.ban_reason",
            params![
                member.network_id.as_i64(),
                member.user_id.as_i64(),
                member.is_member,
                member.is_admin,
                member.is_muted,
                member.is_banned,
                member.ban_reason,
            ],
        )?;
        Ok(())
    }

    pub fn delete_member(&self, network_id: Id, user_id: Id) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM members WHERE network_id = ?1 AND user_id = ?2",
            params![network_id.as_i64(), user_id.as_i64()],
        )?;
        Ok(affected > 0)
    }

    /// Present, non-banned members ordered by user id.
    pub fn active_members(&self, network_id: Id) -> Result<Vec<Member>> {
        self.query_members(
            &format!(
                "SELECT {MEMBER_COLUMNS} FROM members
                 WHERE network_id = ?1 AND is_member = 1 AND is_banned = 0
                 ORDER BY user_id ASC"
            ),
            network_id,
        )
    }

    pub fn active_member_ids(&self, network_id: Id) -> Result<Vec<Id>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT user_id FROM members
             WHERE network_id = ?1 AND is_member = 1 AND is_banned = 0
             ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map(params![network_id.as_i64()], |row| {
            Ok(Id::from_i64(row.get(0)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    pub fn active_admin_ids(&self, network_id: Id) -> Result<Vec<Id>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT user_id FROM members
             WHERE network_id = ?1 AND is_member = 1 AND is_banned = 0 AND is_admin = 1
             ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map(params![network_id.as_i64()], |row| {
            Ok(Id::from_i64(row.get(0)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    pub fn banned_members(&self, network_id: Id) -> Result<Vec<Member>> {
        self.query_members(
            &format!(
                "SELECT {MEMBER_COLUMNS} FROM members
                 WHERE network_id = ?1 AND is_banned = 1
                 ORDER BY user_id ASC"
            ),
            network_id,
        )
    }

    fn query_members(&self, sql: &str, network_id: Id) -> Result<Vec<Member>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![network_id.as_i64()], row_to_member)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        network_id: Id::from_i64(row.get(0)?),
        user_id: Id::from_i64(row.get(1)?),
        is_member: row.get(2)?,
        is_admin: row.get(3)?,
        is_muted: row.get(4)?,
        is_banned: row.get(5)?,
        ban_reason: row.get(6)?,
    })
}
