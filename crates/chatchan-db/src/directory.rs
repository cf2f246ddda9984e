use rusqlite::{OptionalExtension, params};

use crate::models::ChannelRow;
use crate::{Database, StoreError};

impl Database {
    // -- Accounts --

    /// Register an account's partition. Existing registrations win, so the
    /// returned value is the partition actually on record.
    pub fn register_account(&self, name: &str, partition: u32, now: i64) -> Result<u32, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO accounts (name, partition, created_at) VALUES (?1, ?2, ?3)",
                params![name, partition, now],
            )?;
            let stored: u32 = conn.query_row(
                "SELECT partition FROM accounts WHERE name = ?1",
                [name],
                |row| row.get(0),
            )?;
            Ok(stored)
        })
    }

    pub fn account_partition(&self, name: &str) -> Result<Option<u32>, StoreError> {
        self.with_conn(|conn| {
            let partition = conn
                .query_row(
                    "SELECT partition FROM accounts WHERE name = ?1",
                    [name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(partition)
        })
    }

    // -- Channels --

    pub fn insert_channel(
        &self,
        kind: &str,
        partition: u32,
        owner_id: &str,
        member_list: &str,
        now: i64,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (kind, partition, owner_id, member_list, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![kind, partition, owner_id, member_list, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_channel(&self, id: i64) -> Result<Option<ChannelRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, kind, partition, owner_id, member_list, is_deleted, version, created_at
                     FROM channels WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(ChannelRow {
                            id: row.get(0)?,
                            kind: row.get(1)?,
                            partition: row.get(2)?,
                            owner_id: row.get(3)?,
                            member_list: row.get(4)?,
                            is_deleted: row.get(5)?,
                            version: row.get(6)?,
                            created_at: row.get(7)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn soft_delete_channel(&self, id: i64) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE channels SET is_deleted = 1, version = version + 1
                 WHERE id = ?1 AND is_deleted = 0",
                [id],
            )?;
            Ok(affected)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_account_registration_wins() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.register_account("UA:alice", 2, 1).unwrap(), 2);
        assert_eq!(db.register_account("UA:alice", 3, 2).unwrap(), 2);
        assert_eq!(db.account_partition("UA:alice").unwrap(), Some(2));
        assert_eq!(db.account_partition("UA:nobody").unwrap(), None);
    }

    #[test]
    fn channel_soft_delete_happens_once() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_channel("DM", 1, "UA:alice", "[]", 1).unwrap();

        assert_eq!(db.soft_delete_channel(id).unwrap(), 1);
        assert_eq!(db.soft_delete_channel(id).unwrap(), 0);

        let row = db.get_channel(id).unwrap().unwrap();
        assert!(row.is_deleted);
        assert_eq!(row.version, 1);
    }
}
