use eko_shared::constants::DEFAULT_FREQUENCY_NAME;
use eko_shared::{Frequency, FrequencyPerms, Id, Member, Network};
use rusqlite::params;

use crate::database::Tx;
use crate::error::{Result, StoreError};

const NETWORK_COLUMNS: &str = "id, owner_id, name, icon, bg_hex, fg_hex, is_public";

impl Tx<'_> {
    /// Create a network together with its owner's admin row and the
    /// default read-write frequency at position 0.
    pub fn create_network(&self, network: &Network, frequency_id: Id) -> Result<Frequency> {
        self.insert_network(network)?;
        self.upsert_member(&Member {
            network_id: network.id,
            user_id: network.owner_id,
            is_member: true,
            is_admin: true,
            is_muted: false,
            is_banned: false,
            ban_reason: None,
        })?;
        self.insert_frequency(
            frequency_id,
            network.id,
            DEFAULT_FREQUENCY_NAME,
            &network.fg_hex,
            FrequencyPerms::ReadWrite,
        )
    }

    /// Insert the network row only. Callers add the owner's member row and
    /// the first frequency in the same transaction.
    pub fn insert_network(&self, network: &Network) -> Result<()> {
        self.conn().execute(
            "INSERT INTO networks (id, owner_id, name, icon, bg_hex, fg_hex, is_public)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                network.id.as_i64(),
                network.owner_id.as_i64(),
                network.name,
                network.icon,
                network.bg_hex,
                network.fg_hex,
                network.is_public,
            ],
        )?;
        Ok(())
    }

    pub fn get_network(&self, id: Id) -> Result<Network> {
        self.conn()
            .query_row(
                &format!("SELECT {NETWORK_COLUMNS} FROM networks WHERE id = ?1"),
                params![id.as_i64()],
                row_to_network,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::from(other),
            })
    }

    /// Overwrite the mutable fields. Ownership goes through
    /// [`Tx::set_network_owner`].
    pub fn update_network(&self, network: &Network) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE networks SET name = ?2, icon = ?3, bg_hex = ?4, fg_hex = ?5, is_public = ?6
             WHERE id = ?1",
            params![
                network.id.as_i64(),
                network.name,
                network.icon,
                network.bg_hex,
                network.fg_hex,
                network.is_public,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Fails with [`StoreError::Constraint`] unless `owner_id` is an active
    /// admin of the network.
    pub fn set_network_owner(&self, id: Id, owner_id: Id) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE networks SET owner_id = ?2 WHERE id = ?1",
            params![id.as_i64(), owner_id.as_i64()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ON DELETE CASCADE: frequencies, their messages and members go with it
    pub fn delete_network(&self, id: Id) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM networks WHERE id = ?1", params![id.as_i64()])?;
        Ok(affected > 0)
    }

    /// Networks in which `user_id` is an active (non-banned) member.
    pub fn networks_of_user(&self, user_id: Id) -> Result<Vec<Network>> {
        let mut stmt = self.conn().prepare(
            "SELECT n.id, n.owner_id, n.name, n.icon, n.bg_hex, n.fg_hex, n.is_public
             FROM networks n
             JOIN members m ON m.network_id = n.id
             WHERE m.user_id = ?1 AND m.is_member = 1 AND m.is_banned = 0
             ORDER BY n.id ASC",
        )?;
        let rows = stmt.query_map(params![user_id.as_i64()], row_to_network)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    pub fn count_owned_networks(&self, user_id: Id) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM networks WHERE owner_id = ?1",
            params![user_id.as_i64()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_networks(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM networks", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_network(row: &rusqlite::Row<'_>) -> rusqlite::Result<Network> {
    Ok(Network {
        id: Id::from_i64(row.get(0)?),
        owner_id: Id::from_i64(row.get(1)?),
        name: row.get(2)?,
        icon: row.get(3)?,
        bg_hex: row.get(4)?,
        fg_hex: row.get(5)?,
        is_public: row.get(6)?,
    })
}
