use eko_shared::{Id, PublicKey, TrustEntry, TrustStatus};
use rusqlite::params;

use crate::database::Tx;
use crate::error::{Result, StoreError};
use crate::users::key_from_blob;

impl Tx<'_> {
    /// Record that `truster` vouches for `trusted_key` as `trusted`'s key.
    /// Re-trusting refreshes the snapshot, so it also confirms a rotated key.
    pub fn set_trust(&self, truster: Id, trusted: Id, trusted_key: &PublicKey) -> Result<()> {
        self.conn().execute(
            "INSERT INTO trust (truster_id, trusted_id, trusted_key) VALUES (?1, ?2, ?3)
             ON CONFLICT (truster_id, trusted_id) DO UPDATE SET trusted_key = excluded.trusted_key",
            params![truster.as_i64(), trusted.as_i64(), &trusted_key[..]],
        )?;
        Ok(())
    }

    pub fn remove_trust(&self, truster: Id, trusted: Id) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM trust WHERE truster_id = ?1 AND trusted_id = ?2",
            params![truster.as_i64(), trusted.as_i64()],
        )?;
        Ok(affected > 0)
    }

    /// Drop trust edges between two users in both directions.
    pub fn remove_trust_between(&self, a: Id, b: Id) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM trust
             WHERE (truster_id = ?1 AND trusted_id = ?2) OR (truster_id = ?2 AND trusted_id = ?1)",
            params![a.as_i64(), b.as_i64()],
        )?;
        Ok(affected)
    }

    pub fn trusts(&self, truster: Id, trusted: Id) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS (SELECT 1 FROM trust WHERE truster_id = ?1 AND trusted_id = ?2)",
            params![truster.as_i64(), trusted.as_i64()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Every edge `truster` holds, compared against the trusted user's
    /// current key. A changed key is reported, never dropped.
    pub fn trust_entries(&self, truster: Id) -> Result<Vec<TrustEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT t.trusted_id, t.trusted_key, u.public_key
             FROM trust t
             JOIN users u ON u.id = t.trusted_id
             WHERE t.truster_id = ?1
             ORDER BY t.trusted_id ASC",
        )?;
        let rows = stmt.query_map(params![truster.as_i64()], |row| {
            let trusted_key = key_from_blob(1, row.get(1)?)?;
            let current_key = key_from_blob(2, row.get(2)?)?;
            Ok(TrustEntry {
                user_id: Id::from_i64(row.get(0)?),
                trusted_key,
                status: if trusted_key == current_key {
                    TrustStatus::Trusted
                } else {
                    TrustStatus::KeyMismatch
                },
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use eko_shared::TrustStatus;

    use crate::test_support::{new_user, open};
    use crate::StoreError;

    #[test]
    fn trust_twice_is_one_edge() {
        let mut db = open();
        db.transaction(|tx| {
            let a = new_user(tx, 1, "a");
            let b = new_user(tx, 2, "b");
            tx.set_trust(a.id, b.id, &b.public_key)?;
            tx.set_trust(a.id, b.id, &b.public_key)?;

            let entries = tx.trust_entries(a.id)?;
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].status, TrustStatus::Trusted);
            assert!(tx.trusts(a.id, b.id)?);
            assert!(!tx.trusts(b.id, a.id)?);

            assert!(tx.remove_trust(a.id, b.id)?);
            assert!(!tx.remove_trust(a.id, b.id)?);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn stale_snapshot_is_key_mismatch() {
        let mut db = open();
        db.transaction(|tx| {
            let a = new_user(tx, 1, "a");
            let b = new_user(tx, 2, "b");
            tx.set_trust(a.id, b.id, &[0xEE; 32])?;

            let entries = tx.trust_entries(a.id)?;
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].status, TrustStatus::KeyMismatch);
            assert_eq!(entries[0].trusted_key, [0xEE; 32]);

            // Confirming again adopts the current key.
            tx.set_trust(a.id, b.id, &b.public_key)?;
            assert_eq!(tx.trust_entries(a.id)?[0].status, TrustStatus::Trusted);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn self_trust_refused() {
        let mut db = open();
        let result = db.transaction(|tx| {
            let a = new_user(tx, 1, "a");
            tx.set_trust(a.id, a.id, &a.public_key)
        });
        assert!(matches!(result, Err(StoreError::Constraint(_))));
    }
}
