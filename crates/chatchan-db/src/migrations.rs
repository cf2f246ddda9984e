use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

/// Every store gets the full schema. Which tables are actually used depends
/// on the role the partition config gives the store: the core store holds the
/// work queue and the directory, data stores hold messages and participants.
pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid        TEXT NOT NULL,
            kind        INTEGER NOT NULL,
            channel_id  TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            ordinal     INTEGER NOT NULL,
            body        TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            UNIQUE(channel_id, uuid),
            UNIQUE(channel_id, ordinal)
        );

        CREATE TABLE IF NOT EXISTS participants (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id            TEXT NOT NULL,
            channel_id            TEXT NOT NULL,
            last_message_ordinal  INTEGER NOT NULL DEFAULT 0,
            last_read_ordinal     INTEGER NOT NULL DEFAULT 0,
            message_info          TEXT,
            is_deleted            INTEGER NOT NULL DEFAULT 0,
            version               INTEGER NOT NULL DEFAULT 0,
            created_at            INTEGER NOT NULL,
            updated_at            INTEGER NOT NULL,
            UNIQUE(account_id, channel_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_account_updated
            ON participants(account_id, updated_at);

        CREATE TABLE IF NOT EXISTS work_queue (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            payload     TEXT NOT NULL,
            version     INTEGER NOT NULL DEFAULT 0,
            updated_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_work_queue_ready
            ON work_queue(version, updated_at);

        CREATE TABLE IF NOT EXISTS accounts (
            name        TEXT PRIMARY KEY,
            partition   INTEGER NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            kind         TEXT NOT NULL,
            partition    INTEGER NOT NULL,
            owner_id     TEXT NOT NULL,
            member_list  TEXT NOT NULL,
            is_deleted   INTEGER NOT NULL DEFAULT 0,
            version      INTEGER NOT NULL DEFAULT 0,
            created_at   INTEGER NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
