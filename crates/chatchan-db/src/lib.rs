pub mod directory;
pub mod error;
pub mod migrations;
pub mod models;
pub mod partition;
pub mod queries;
pub mod queue;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

pub use error::StoreError;
pub use partition::{
    HashPartitioner, PartitionError, PartitionRouter, PartitionStrategy, RandomPartitioner,
    StorageConfig, StoreConfig,
};

/// Path that opens a private in-memory store instead of a file.
pub const MEMORY_PATH: &str = ":memory:";

/// How long a statement waits on another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if path == Path::new(MEMORY_PATH) {
            return Self::open_in_memory();
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}

/// Cloneable async handle to one backing store.
///
/// rusqlite is blocking, so every call hops onto tokio's blocking pool the
/// same way request handlers do.
#[derive(Clone)]
pub struct StoreHandle {
    name: Arc<str>,
    db: Arc<Database>,
}

impl StoreHandle {
    pub fn new(name: &str, db: Database) -> Self {
        Self {
            name: Arc::from(name),
            db: Arc::new(db),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").field("name", &self.name).finish()
    }
}

/// Current time as stored in every `*_at` column: Unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", millis)))
}
