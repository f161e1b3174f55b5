use eko_shared::constants::DELETED_USER_NAME;
use eko_shared::{Id, PublicKey, User};
use rusqlite::{params, OptionalExtension};

use crate::database::Tx;
use crate::error::{Result, StoreError};

const USER_COLUMNS: &str = "id, name, description, public_key, is_public_dm, is_deleted";

/// Account-level flags the server checks at authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountStatus {
    pub is_banned: bool,
    pub is_deleted: bool,
}

impl Tx<'_> {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, public_key, name, description, is_public_dm, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.as_i64(),
                &user.public_key[..],
                user.name,
                user.description,
                user.is_public_dm,
                user.is_deleted,
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: Id) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_i64()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::from(other),
            })
    }

    pub fn find_user_by_key(&self, public_key: &PublicKey) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE public_key = ?1"),
                params![&public_key[..]],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Profiles for `ids`, in the order given. Unknown ids are skipped.
    pub fn get_users(&self, ids: &[Id]) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare_cached(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = stmt.query_row(params![id.as_i64()], row_to_user).optional()? {
                users.push(user);
            }
        }
        Ok(users)
    }

    pub fn account_status(&self, id: Id) -> Result<AccountStatus> {
        self.conn()
            .query_row(
                "SELECT is_banned, is_deleted FROM users WHERE id = ?1",
                params![id.as_i64()],
                |row| {
                    Ok(AccountStatus {
                        is_banned: row.get(0)?,
                        is_deleted: row.get(1)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::from(other),
            })
    }

    /// Apply the `Some` fields of a profile update and return the result.
    pub fn update_user_profile(
        &self,
        id: Id,
        name: Option<&str>,
        description: Option<&str>,
        is_public_dm: Option<bool>,
    ) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                is_public_dm = COALESCE(?4, is_public_dm)
             WHERE id = ?1 AND is_deleted = 0",
            params![id.as_i64(), name, description, is_public_dm],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }

    /// Operator-level ban. Returns `false` if the user does not exist.
    pub fn set_global_ban(&self, id: Id, banned: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET is_banned = ?2 WHERE id = ?1",
            params![id.as_i64(), banned],
        )?;
        Ok(affected > 0)
    }

    /// Tombstone an account: the row stays so history keeps its sender,
    /// the profile is blanked and every membership that is not a ban is
    /// dropped. Returns the network ids the user left.
    pub fn tombstone_user(&self, id: Id) -> Result<Vec<Id>> {
        let affected = self.conn().execute(
            "UPDATE users SET name = ?2, description = '', is_public_dm = 0, is_deleted = 1
             WHERE id = ?1 AND is_deleted = 0",
            params![id.as_i64(), DELETED_USER_NAME],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        let mut stmt = self.conn().prepare(
            "DELETE FROM members WHERE user_id = ?1 AND is_banned = 0 RETURNING network_id",
        )?;
        let rows = stmt.query_map(params![id.as_i64()], |row| Ok(Id::from_i64(row.get(0)?)))?;
        let left = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        self.conn().execute(
            "DELETE FROM trust WHERE truster_id = ?1 OR trusted_id = ?1",
            params![id.as_i64()],
        )?;
        Ok(left)
    }

    pub fn count_users(&self) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE is_deleted = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

pub(crate) fn key_from_blob(idx: usize, bytes: Vec<u8>) -> rusqlite::Result<PublicKey> {
    PublicKey::try_from(bytes.as_slice()).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Blob, Box::new(e))
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: Id::from_i64(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        public_key: key_from_blob(3, row.get(3)?)?,
        is_public_dm: row.get(4)?,
        is_deleted: row.get(5)?,
    })
}
