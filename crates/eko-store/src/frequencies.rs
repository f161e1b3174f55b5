use eko_shared::{Frequency, FrequencyPerms, Id};
use rusqlite::params;

use crate::database::Tx;
use crate::error::{Result, StoreError};

const FREQUENCY_COLUMNS: &str = "id, network_id, name, hex_color, perms, position";

impl Tx<'_> {
    /// Append a frequency after the last position of its network.
    pub fn insert_frequency(
        &self,
        id: Id,
        network_id: Id,
        name: &str,
        hex_color: &str,
        perms: FrequencyPerms,
    ) -> Result<Frequency> {
        let position = self.count_frequencies(network_id)? as u32;
        self.conn().execute(
            "INSERT INTO frequencies (id, network_id, name, hex_color, perms, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.as_i64(),
                network_id.as_i64(),
                name,
                hex_color,
                perms.as_i64(),
                position,
            ],
        )?;
        Ok(Frequency {
            id,
            network_id,
            name: name.to_string(),
            hex_color: hex_color.to_string(),
            perms,
            position,
        })
    }

    pub fn get_frequency(&self, id: Id) -> Result<Frequency> {
        self.conn()
            .query_row(
                &format!("SELECT {FREQUENCY_COLUMNS} FROM frequencies WHERE id = ?1"),
                params![id.as_i64()],
                row_to_frequency,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::from(other),
            })
    }

    pub fn update_frequency(
        &self,
        id: Id,
        name: &str,
        hex_color: &str,
        perms: FrequencyPerms,
    ) -> Result<Frequency> {
        let affected = self.conn().execute(
            "UPDATE frequencies SET name = ?2, hex_color = ?3, perms = ?4 WHERE id = ?1",
            params![id.as_i64(), name, hex_color, perms.as_i64()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_frequency(id)
    }

    /// All frequencies of a network, ordered by position.
    pub fn list_frequencies(&self, network_id: Id) -> Result<Vec<Frequency>> {
        let mut stmt = self.conn().prepare_cached(&format!(
            "SELECT {FREQUENCY_COLUMNS} FROM frequencies
             WHERE network_id = ?1 ORDER BY position ASC"
        ))?;
        let rows = stmt.query_map(params![network_id.as_i64()], row_to_frequency)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    pub fn count_frequencies(&self, network_id: Id) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM frequencies WHERE network_id = ?1",
            params![network_id.as_i64()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete a frequency (its messages cascade) and close the gap it
    /// leaves, so positions stay `0..n`.
    pub fn delete_frequency(&self, id: Id) -> Result<Frequency> {
        let frequency = self.get_frequency(id)?;
        self.conn()
            .execute("DELETE FROM frequencies WHERE id = ?1", params![id.as_i64()])?;

        // UNIQUE(network_id, position) is checked row by row, so shift the
        // tail through negative positions first.
        self.conn().execute(
            "UPDATE frequencies SET position = -position - 1
             WHERE network_id = ?1 AND position > ?2",
            params![frequency.network_id.as_i64(), frequency.position],
        )?;
        self.conn().execute(
            "UPDATE frequencies SET position = -position - 2
             WHERE network_id = ?1 AND position < 0",
            params![frequency.network_id.as_i64()],
        )?;
        Ok(frequency)
    }

    /// Exchange the frequencies at two positions. [`StoreError::NotFound`]
    /// if either position is empty.
    pub fn swap_frequency_positions(&self, network_id: Id, pos1: u32, pos2: u32) -> Result<()> {
        let id_at = |position: u32| -> Result<i64> {
            self.conn()
                .query_row(
                    "SELECT id FROM frequencies WHERE network_id = ?1 AND position = ?2",
                    params![network_id.as_i64(), position],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)
        };
        let first = id_at(pos1)?;
        let second = id_at(pos2)?;

        let mut stmt = self
            .conn()
            .prepare_cached("UPDATE frequencies SET position = ?2 WHERE id = ?1")?;
        stmt.execute(params![first, -1])?;
        stmt.execute(params![second, pos1])?;
        stmt.execute(params![first, pos2])?;
        Ok(())
    }
}

fn row_to_frequency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Frequency> {
    let perms_raw: i64 = row.get(4)?;
    let perms = FrequencyPerms::from_i64(perms_raw).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(4, perms_raw)
    })?;

    Ok(Frequency {
        id: Id::from_i64(row.get(0)?),
        network_id: Id::from_i64(row.get(1)?),
        name: row.get(2)?,
        hex_color: row.get(3)?,
        perms,
        position: row.get(5)?,
    })
}
