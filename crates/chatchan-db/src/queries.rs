use rusqlite::{OptionalExtension, Row, params};

use crate::models::{MessageRow, ParticipantRow};
use crate::{Database, StoreError};

const MESSAGE_COLUMNS: &str =
    "id, uuid, kind, channel_id, sender_id, ordinal, body, created_at";

const PARTICIPANT_COLUMNS: &str = "id, account_id, channel_id, last_message_ordinal, \
     last_read_ordinal, message_info, is_deleted, version, created_at, updated_at";

impl Database {
    // -- Messages --

    /// Insert a message at the next ordinal of its channel.
    ///
    /// The ordinal is computed inside the INSERT itself, so two appenders can
    /// never both read the same MAX and write it back. A repeated
    /// `(channel_id, uuid)` fails with `StoreError::Duplicate` and consumes
    /// no ordinal.
    pub fn insert_message(
        &self,
        uuid: &str,
        kind: i64,
        channel_id: &str,
        sender_id: &str,
        body: &str,
        created_at: i64,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (uuid, kind, channel_id, sender_id, ordinal, body, created_at)
                 SELECT ?1, ?2, ?3, ?4, COALESCE(MAX(ordinal), 0) + 1, ?5, ?6
                 FROM messages WHERE channel_id = ?3",
                params![uuid, kind, channel_id, sender_id, body, created_at],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, channel_id: &str, uuid: &str) -> Result<Option<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM messages WHERE channel_id = ?1 AND uuid = ?2",
                        MESSAGE_COLUMNS
                    ),
                    params![channel_id, uuid],
                    map_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Messages with `ordinal > since_ordinal`, ascending, at most `limit`.
    pub fn list_messages(
        &self,
        channel_id: &str,
        since_ordinal: i64,
        limit: u32,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages
                 WHERE channel_id = ?1 AND ordinal > ?2
                 ORDER BY ordinal ASC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            ))?;

            let rows = stmt
                .query_map(params![channel_id, since_ordinal, limit], map_message)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Participants --

    pub fn get_participant(
        &self,
        account_id: &str,
        channel_id: &str,
    ) -> Result<Option<ParticipantRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM participants WHERE account_id = ?1 AND channel_id = ?2",
                        PARTICIPANT_COLUMNS
                    ),
                    params![account_id, channel_id],
                    map_participant,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn insert_participant(
        &self,
        account_id: &str,
        channel_id: &str,
        now: i64,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO participants (account_id, channel_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![account_id, channel_id, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Lazily create a participant seeded with its first incoming message.
    pub fn insert_participant_with_message(
        &self,
        account_id: &str,
        channel_id: &str,
        ordinal: i64,
        message_info: &str,
        now: i64,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO participants
                    (account_id, channel_id, last_message_ordinal, message_info, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![account_id, channel_id, ordinal, message_info, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Flip the soft-delete flag. Only rows currently in the opposite state
    /// are touched, so the affected count says whether anything changed.
    pub fn set_participant_deleted(
        &self,
        account_id: &str,
        channel_id: &str,
        deleted: bool,
        now: i64,
    ) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE participants SET is_deleted = ?3, updated_at = MAX(?4, updated_at + 1)
                 WHERE account_id = ?1 AND channel_id = ?2 AND is_deleted = ?5",
                params![account_id, channel_id, deleted, now, !deleted],
            )?;
            Ok(affected)
        })
    }

    /// Optimistic update of the latest-message projection. Zero rows means
    /// another writer bumped `version` first.
    pub fn update_participant_message(
        &self,
        id: i64,
        version: i64,
        ordinal: i64,
        message_info: &str,
        now: i64,
    ) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE participants
                 SET last_message_ordinal = ?3, message_info = ?4, version = version + 1,
                     updated_at = MAX(?5, updated_at + 1)
                 WHERE id = ?1 AND version = ?2",
                params![id, version, ordinal, message_info, now],
            )?;
            Ok(affected)
        })
    }

    /// Monotonic read marker. The target is clamped to the last known
    /// message ordinal and only ever moves forward.
    pub fn update_participant_read(
        &self,
        account_id: &str,
        channel_id: &str,
        through: i64,
        now: i64,
    ) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE participants
                 SET last_read_ordinal = MIN(?3, last_message_ordinal),
                     updated_at = MAX(?4, updated_at + 1)
                 WHERE account_id = ?1 AND channel_id = ?2 AND is_deleted = 0
                   AND last_read_ordinal < MIN(?3, last_message_ordinal)",
                params![account_id, channel_id, through, now],
            )?;
            Ok(affected)
        })
    }

    /// Active participants of an account, optionally only those updated after
    /// `updated_since` (Unix ms), oldest update first.
    ///
    /// Every participant update stamps at least one ms past the row's previous
    /// stamp, so a cursor taken from a row always sees that row's next change.
    pub fn list_participants(
        &self,
        account_id: &str,
        updated_since: Option<i64>,
    ) -> Result<Vec<ParticipantRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM participants
                 WHERE account_id = ?1 AND is_deleted = 0 AND updated_at > ?2
                 ORDER BY updated_at ASC, id ASC",
                PARTICIPANT_COLUMNS
            ))?;

            let rows = stmt
                .query_map(
                    params![account_id, updated_since.unwrap_or(i64::MIN)],
                    map_participant,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        uuid: row.get(1)?,
        kind: row.get(2)?,
        channel_id: row.get(3)?,
        sender_id: row.get(4)?,
        ordinal: row.get(5)?,
        body: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_participant(row: &Row<'_>) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        id: row.get(0)?,
        account_id: row.get(1)?,
        channel_id: row.get(2)?,
        last_message_ordinal: row.get(3)?,
        last_read_ordinal: row.get(4)?,
        message_info: row.get(5)?,
        is_deleted: row.get(6)?,
        version: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
