//! Persistence layer: one SQLite file holding models and chat history.
//!
//! ```text
//! {data_dir}/
//! └── chat.db
//!     ├── Model        (id, name UNIQUE, path, isactive)
//!     ├── ChatSession  (session_id, session_date, session_time)
//!     └── Message      (message_id, session_id → ChatSession, sender, message_text, timestamp)
//! ```
//!
//! Connections are opened per operation and dropped when it returns; no
//! handle is shared between threads. Both stores are cheap `Clone` values
//! holding only the database path.

pub mod conversations;
pub mod models;

pub use conversations::{ConversationStore, MessageRecord, SessionSummary};
pub use models::{ModelRecord, ModelRegistry};

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, error};

use crate::error::AppError;

/// Schema version stored in `PRAGMA user_version`.
/// Increment when the DDL changes; add a migration path in `init_schema`.
pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Handle to the on-disk database. Opening it creates the file and schema.
#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Create parent directories, open the file once and apply the schema.
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    storage_err(&format!("cannot create {}", parent.display()), e)
                })?;
            }
        }

        let db = Self { db_path: db_path.to_path_buf() };
        let conn = db.connect()?;
        init_schema(&conn)?;
        debug!(path = %db.db_path.display(), "database ready");
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn models(&self) -> ModelRegistry {
        ModelRegistry::new(self.clone())
    }

    pub fn conversations(&self) -> ConversationStore {
        ConversationStore::new(self.clone())
    }

    /// Open a fresh connection with the pragmas every operation relies on.
    ///
    /// - `busy_timeout = 5000`: wait up to 5 s before returning `SQLITE_BUSY`.
    /// - `journal_mode = WAL`: readers do not block the writer.
    /// - `foreign_keys = ON`: `Message.session_id` must name a session.
    pub(crate) fn connect(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| storage_err(&format!("open {}", self.db_path.display()), e))?;

        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| storage_err("set busy_timeout", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| storage_err("set journal_mode WAL", e))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| storage_err("set foreign_keys ON", e))?;

        Ok(conn)
    }
}

/// Create the three tables if missing. Column shapes match existing data
/// files, so an old database opens without migration.
fn init_schema(conn: &Connection) -> Result<(), AppError> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| storage_err("read user_version", e))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS Model (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE,
            path TEXT,
            isactive INTEGER DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS ChatSession (
            session_id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_date TEXT,
            session_time TEXT
        );

        CREATE TABLE IF NOT EXISTS Message (
            message_id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER,
            sender TEXT,
            message_text TEXT,
            timestamp TEXT,
            FOREIGN KEY (session_id) REFERENCES ChatSession(session_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chatsession_date ON ChatSession(session_date);
        CREATE INDEX IF NOT EXISTS idx_message_session ON Message(session_id, message_id);

        PRAGMA user_version = 1;
        ",
    )
    .map_err(|e| storage_err("initialize schema", e))
}

/// Log a storage failure at the boundary and convert it to [`AppError::Storage`].
pub(crate) fn storage_err(context: &str, e: impl std::fmt::Display) -> AppError {
    error!(%context, error = %e, "storage operation failed");
    AppError::Storage(format!("{context}: {e}"))
}
