use rusqlite::{OptionalExtension, params};

use crate::models::QueueRow;
use crate::{Database, StoreError};

impl Database {
    // -- Work queue --

    pub fn enqueue(&self, payload: &str, now: i64) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO work_queue (payload, version, updated_at) VALUES (?1, 0, ?2)",
                params![payload, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Oldest event that was never reserved, or whose reservation is older
    /// than `stale_before` (Unix ms).
    pub fn select_ready(&self, stale_before: i64) -> Result<Option<QueueRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, payload, version, updated_at FROM work_queue
                     WHERE version = 0 OR updated_at < ?1
                     ORDER BY id ASC
                     LIMIT 1",
                    [stale_before],
                    |row| {
                        Ok(QueueRow {
                            id: row.get(0)?,
                            payload: row.get(1)?,
                            version: row.get(2)?,
                            updated_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Claim an event by bumping its version. Zero rows means another worker
    /// reserved it between selection and this statement.
    pub fn reserve(&self, id: i64, version: i64, now: i64) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE work_queue SET version = version + 1, updated_at = ?3
                 WHERE id = ?1 AND version = ?2",
                params![id, version, now],
            )?;
            Ok(affected)
        })
    }

    pub fn delete_reserved(&self, id: i64, version: i64) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM work_queue WHERE id = ?1 AND version = ?2",
                params![id, version],
            )?;
            Ok(affected)
        })
    }

    pub fn queue_depth(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM work_queue", [], |row| row.get(0))?;
            Ok(count)
        })
    }
}
