use eko_shared::{Destination, Id, Message, Ping};
use rusqlite::params;

use crate::database::Tx;
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender_id, frequency_id, receiver_id, content, \
     ping_kind, ping_user_id, is_edited, is_deleted";

impl Tx<'_> {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let (frequency_id, receiver_id) = match message.destination {
            Destination::Channel(id) => (Some(id.as_i64()), None),
            Destination::Dm(id) => (None, Some(id.as_i64())),
        };
        let (ping_kind, ping_user_id) = ping_to_columns(message.ping);

        self.conn().execute(
            "INSERT INTO messages
                (id, sender_id, frequency_id, receiver_id, content,
                 ping_kind, ping_user_id, is_edited, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.as_i64(),
                message.sender_id.as_i64(),
                frequency_id,
                receiver_id,
                message.content,
                ping_kind,
                ping_user_id,
                message.edited,
                message.deleted,
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: Id) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.as_i64()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::from(other),
            })
    }

    /// Replace the content of a live message and mark it edited.
    pub fn edit_message(&self, id: Id, content: &str) -> Result<Message> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?2, is_edited = 1 WHERE id = ?1 AND is_deleted = 0",
            params![id.as_i64(), content],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_message(id)
    }

    /// Blank the content and flag the row deleted. Returns `false` if it
    /// already was.
    pub fn tombstone_message(&self, id: Id) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = '', ping_kind = NULL, ping_user_id = NULL, is_deleted = 1
             WHERE id = ?1 AND is_deleted = 0",
            params![id.as_i64()],
        )?;
        Ok(affected > 0)
    }

    /// Up to `limit` channel messages older than `before` (newest first
    /// when `None`), returned in ascending id order. Messages from users
    /// `viewer` has blocked are left out.
    pub fn channel_history(
        &self,
        frequency_id: Id,
        viewer: Id,
        before: Option<Id>,
        limit: u16,
    ) -> Result<Vec<Message>> {
        self.history(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE frequency_id = ?1
                   AND (?2 IS NULL OR id < ?2)
                   AND sender_id NOT IN (SELECT blocked_id FROM blocks WHERE blocker_id = ?3)
                 ORDER BY id DESC
                 LIMIT ?4"
            ),
            params![
                frequency_id.as_i64(),
                before.map(|id| id.as_i64()),
                viewer.as_i64(),
                limit,
            ],
        )
    }

    /// Same paging as [`Tx::channel_history`] over the DM signal between
    /// `viewer` and `peer`.
    pub fn dm_history(
        &self,
        viewer: Id,
        peer: Id,
        before: Option<Id>,
        limit: u16,
    ) -> Result<Vec<Message>> {
        self.history(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE ((sender_id = ?1 AND receiver_id = ?2)
                        OR (sender_id = ?2 AND receiver_id = ?1))
                   AND (?3 IS NULL OR id < ?3)
                   AND sender_id NOT IN (SELECT blocked_id FROM blocks WHERE blocker_id = ?1)
                 ORDER BY id DESC
                 LIMIT ?4"
            ),
            params![
                viewer.as_i64(),
                peer.as_i64(),
                before.map(|id| id.as_i64()),
                limit,
            ],
        )
    }

    fn history(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        let rows = stmt.query_map(params, row_to_message)?;
        let mut messages = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Whether any DM has been exchanged between the two users.
    pub fn dm_exists(&self, a: Id, b: Id) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS (
                SELECT 1 FROM messages
                WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
             )",
            params![a.as_i64(), b.as_i64()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

fn ping_to_columns(ping: Option<Ping>) -> (Option<i64>, Option<i64>) {
    match ping {
        None => (None, None),
        Some(Ping::Everyone) => (Some(0), None),
        Some(Ping::Admins) => (Some(1), None),
        Some(Ping::User(id)) => (Some(2), Some(id.as_i64())),
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let frequency_id: Option<i64> = row.get(2)?;
    let receiver_id: Option<i64> = row.get(3)?;
    let destination = match (frequency_id, receiver_id) {
        (Some(id), None) => Destination::Channel(Id::from_i64(id)),
        (None, Some(id)) => Destination::Dm(Id::from_i64(id)),
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                2,
                "frequency_id".into(),
                rusqlite::types::Type::Null,
            ))
        }
    };

    let ping_kind: Option<i64> = row.get(5)?;
    let ping_user_id: Option<i64> = row.get(6)?;
    let ping = match (ping_kind, ping_user_id) {
        (Some(0), _) => Some(Ping::Everyone),
        (Some(1), _) => Some(Ping::Admins),
        (Some(2), Some(id)) => Some(Ping::User(Id::from_i64(id))),
        _ => None,
    };

    Ok(Message {
        id: Id::from_i64(row.get(0)?),
        sender_id: Id::from_i64(row.get(1)?),
        destination,
        content: row.get(4)?,
        ping,
        edited: row.get(7)?,
        deleted: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use eko_shared::{Destination, Id, Message, Ping};

    use crate::database::Tx;
    use crate::test_support::{new_network, new_user, open};
    use crate::StoreError;

    fn send(tx: &Tx<'_>, id: u64, sender: Id, destination: Destination) -> Message {
        let message = Message {
            id: Id(id),
            sender_id: sender,
            destination,
            content: format!("message {id}"),
            ping: None,
            edited: false,
            deleted: false,
        };
        tx.insert_message(&message).unwrap();
        message
    }

    fn ids(messages: &[Message]) -> Vec<u64> {
        messages.iter().map(|m| m.id.0).collect()
    }

    #[test]
    fn channel_history_pages_ascending() {
        let mut db = open();
        db.transaction(|tx| {
            let owner = new_user(tx, 1, "owner");
            let network = new_network(tx, 10, owner.id);
            let freq = tx.list_frequencies(network.id)?[0].id;
            for id in 100..110 {
                send(tx, id, owner.id, Destination::Channel(freq));
            }

            let newest = tx.channel_history(freq, owner.id, None, 3)?;
            assert_eq!(ids(&newest), vec![107, 108, 109]);

            let older = tx.channel_history(freq, owner.id, Some(Id(107)), 3)?;
            assert_eq!(ids(&older), vec![104, 105, 106]);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn history_filters_blocked_senders() {
        let mut db = open();
        db.transaction(|tx| {
            let a = new_user(tx, 1, "a");
            let b = new_user(tx, 2, "b");
            send(tx, 100, a.id, Destination::Dm(b.id));
            send(tx, 101, b.id, Destination::Dm(a.id));
            assert_eq!(ids(&tx.dm_history(a.id, b.id, None, 50)?), vec![100, 101]);

            tx.add_block(a.id, b.id)?;
            assert_eq!(ids(&tx.dm_history(a.id, b.id, None, 50)?), vec![100]);
            // The blocked side still sees its own signal.
            assert_eq!(ids(&tx.dm_history(b.id, a.id, None, 50)?), vec![100, 101]);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn tombstone_is_redacted_and_idempotent() {
        let mut db = open();
        db.transaction(|tx| {
            let a = new_user(tx, 1, "a");
            let b = new_user(tx, 2, "b");
            let message = send(tx, 100, a.id, Destination::Dm(b.id));

            assert!(tx.tombstone_message(message.id)?);
            assert!(!tx.tombstone_message(message.id)?);

            let stored = tx.get_message(message.id)?;
            assert!(stored.deleted);
            assert!(stored.content.is_empty());
            assert_eq!(tx.dm_history(b.id, a.id, None, 50)?, vec![stored]);
            assert!(matches!(
                tx.edit_message(message.id, "again"),
                Err(StoreError::NotFound)
            ));
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn ping_and_edit_roundtrip() {
        let mut db = open();
        db.transaction(|tx| {
            let a = new_user(tx, 1, "a");
            let network = new_network(tx, 10, a.id);
            let freq = tx.list_frequencies(network.id)?[0].id;
            for (id, ping) in [
                (100, Some(Ping::Everyone)),
                (101, Some(Ping::Admins)),
                (102, Some(Ping::User(a.id))),
                (103, None),
            ] {
                let message = Message {
                    id: Id(id),
                    sender_id: a.id,
                    destination: Destination::Channel(freq),
                    content: "x".into(),
                    ping,
                    edited: false,
                    deleted: false,
                };
                tx.insert_message(&message)?;
                assert_eq!(tx.get_message(message.id)?, message);
            }

            let edited = tx.edit_message(Id(103), "changed")?;
            assert!(edited.edited);
            assert_eq!(edited.content, "changed");
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn dm_exists_either_direction() {
        let mut db = open();
        db.transaction(|tx| {
            let a = new_user(tx, 1, "a");
            let b = new_user(tx, 2, "b");
            let c = new_user(tx, 3, "c");
            send(tx, 100, b.id, Destination::Dm(a.id));
            assert!(tx.dm_exists(a.id, b.id)?);
            assert!(tx.dm_exists(b.id, a.id)?);
            assert!(!tx.dm_exists(a.id, c.id)?);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }
}
