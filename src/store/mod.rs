//! Durable persistence layer: the single source of truth for task state.

pub mod alerts;
pub mod assignments;
pub mod log;
pub mod metrics;
pub mod tasks;

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Setup for on-disk databases. WAL keeps readers off the writer's lock and
/// the busy timeout rides out worker contention bursts.
const FILE_PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA foreign_keys=ON;
     PRAGMA busy_timeout=5000;";

/// Handle on the task database. Cloning shares the connection; every public
/// operation is its own transaction, so no caller holds task state between
/// calls.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database file at `path` and bring the schema up to
    /// date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(FILE_PRAGMAS)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests. WAL does not apply here.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        embedded::migrations::runner().run(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Write a consistent snapshot of the database to `path` via
    /// `VACUUM INTO`. The target file must not already exist.
    pub fn backup<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "VACUUM INTO ?1",
                [path.as_ref().to_string_lossy().into_owned()],
            )?;
            Ok(())
        })
    }

    /// Run a read against the shared connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run a multi-statement mutation; the closure owns the connection
    /// mutably so it can open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }
}

/// Current time as epoch milliseconds, the unit of every stored timestamp.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
