pub mod consistency;
pub mod error;
pub mod images;
pub mod meadows;
pub mod migrations;
pub mod models;
pub mod trees;
pub mod users;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use tracing::{error, info, warn};

pub use error::{Result, StoreError};
pub use images::{FileStore, ImageRepo};
pub use meadows::MeadowRepo;
pub use models::CascadeReport;
pub use trees::TreeRepo;
pub use users::UserRepo;

/// How to reach the store and how hard to try at startup.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub path: PathBuf,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub busy_timeout: Duration,
    pub readers: usize,
}

impl ConnectOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_attempts: 30,
            retry_delay: Duration::from_secs(2),
            busy_timeout: Duration::from_secs(5),
            readers: 4,
        }
    }
}

/// Shared store handle: one writer connection plus a small round-robin
/// pool of read-only connections. Multi-statement writes go through
/// [`Database::with_tx`] so they commit or roll back as a unit.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
}

impl Database {
    /// Open the store, retrying with a fixed delay until `max_attempts`
    /// is exhausted. Blocks the calling thread between attempts.
    pub fn connect(opts: &ConnectOptions) -> Result<Self> {
        let attempts = opts.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match Self::open(opts) {
                Ok(db) => {
                    info!("Connected to database at {}", opts.path.display());
                    return Ok(db);
                }
                Err(e) => {
                    warn!("Waiting for database... ({}/{}): {}", attempt, attempts, e);
                    last_err = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(opts.retry_delay);
                    }
                }
            }
        }

        Err(StoreError::Unavailable(format!(
            "gave up after {} attempts: {}",
            attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn open(opts: &ConnectOptions) -> Result<Self> {
        if let Some(parent) = opts.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(&opts.path)?;
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(opts.busy_timeout)?;
        writer.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;

        migrations::run(&writer)?;

        let mut readers = Vec::with_capacity(opts.readers.max(1));
        for _ in 0..opts.readers.max(1) {
            let conn = Connection::open_with_flags(
                &opts.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(opts.busy_timeout)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            opts.path.display(),
            readers.len()
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
        })
    }

    /// Run a read-only closure on the next reader connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("reader lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a single write statement (or a sequence that needs no atomicity)
    /// on the writer connection.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .writer
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("writer lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction on the writer. The write lock
    /// is taken up front, so read-modify-write sequences cannot interleave.
    /// Any error rolls the whole transaction back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self
            .writer
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("writer lock poisoned: {}", e)))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn meadows(&self) -> MeadowRepo<'_> {
        MeadowRepo::new(self)
    }

    pub fn trees(&self) -> TreeRepo<'_> {
        TreeRepo::new(self)
    }

    pub fn images(&self) -> ImageRepo<'_> {
        ImageRepo::new(self)
    }

    pub fn users(&self) -> UserRepo<'_> {
        UserRepo::new(self)
    }

    /// Close every connection. All connections are attempted even if one
    /// fails; the first failure is returned.
    pub fn close(self) -> Result<()> {
        let mut first_err = None;

        for slot in std::iter::once(self.writer).chain(self.readers) {
            let conn = slot.into_inner().unwrap_or_else(PoisonError::into_inner);
            if let Err((_, e)) = conn.close() {
                error!("Error closing database connection: {}", e);
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => {
                info!("Database connection closed");
                Ok(())
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn connect_creates_parent_dirs_and_schema() {
        let dir = TempDir::new().unwrap();
        let mut opts = ConnectOptions::new(dir.path().join("nested/deeper/orchard.db"));
        opts.max_attempts = 1;

        let db = Database::connect(&opts).unwrap();
        let tables: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'meadows', 'trees', 'images')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 4);
        db.close().unwrap();
    }

    #[test]
    fn connect_gives_up_after_max_attempts() {
        let dir = TempDir::new().unwrap();
        // A regular file where a directory is expected makes every attempt fail.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let mut opts = ConnectOptions::new(blocker.join("orchard.db"));
        opts.max_attempts = 3;
        opts.retry_delay = Duration::from_millis(1);

        let err = Database::connect(&opts).err().unwrap();
        match err {
            StoreError::Unavailable(msg) => assert!(msg.contains("3 attempts")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn readers_see_committed_writes() {
        let (_dir, db) = testing::open_temp();
        let id = db
            .meadows()
            .insert(&models::NewMeadow::new("North Field", "Oak Grove", 2.5), 7)
            .unwrap();

        // Round-robin across both readers.
        for _ in 0..2 {
            assert!(db.meadows().find_by_id(id, 7).unwrap().is_some());
        }
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let (_dir, db) = testing::open_temp();
        let result: Result<()> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO meadows (location, name, size, tree_ids, user_id) VALUES ('a', 'b', 1.0, '[]', 1)",
                [],
            )?;
            Err(StoreError::NotFound { entity: "meadow", id: 99 })
        });
        assert!(result.is_err());
        assert!(db.meadows().find_all(1).unwrap().is_empty());
    }
}
