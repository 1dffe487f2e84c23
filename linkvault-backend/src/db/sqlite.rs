//! SQLite database - schema definitions and connection management
//!
//! Table operations live in `db/tables/`, each adding an `impl Database`
//! block. Several processes (listener, backfill, cleaner) may open the same
//! file, so the connection runs in WAL mode with a busy timeout.

use parking_lot::Mutex;
use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Main database wrapper; a single connection serialised by a mutex
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) and initialise the schema
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        Self::with_busy_timeout(database_url, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(database_url: &str, busy_timeout: Duration) -> SqliteResult<Self> {
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    log::warn!("[db] Could not create {:?}: {}", parent, e);
                }
            }
        }

        let conn = Connection::open(database_url)?;
        conn.busy_timeout(busy_timeout)?;
        // journal_mode answers with a row, so it cannot go through execute()
        let mode: SqliteResult<String> =
            conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0));
        if let Ok(mode) = mode {
            log::debug!("[db] journal_mode={}", mode);
        }

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name=?1", table),
            [column],
            |row| row.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false)
    }

    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                links TEXT,
                tags TEXT,
                source TEXT,
                channel TEXT,
                group_name TEXT,
                bot TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Migration: exports from the first schema had no provenance columns
        for column in ["source", "channel", "group_name", "bot"] {
            if !Self::column_exists(&conn, "messages", column) {
                log::info!("[db] Adding messages.{} column", column);
                conn.execute(&format!("ALTER TABLE messages ADD COLUMN {} TEXT", column), [])?;
            }
        }

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel)",
            [],
        )?;

        // Per-channel suppression rules
        conn.execute(
            "CREATE TABLE IF NOT EXISTS channel_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT UNIQUE NOT NULL,
                exclude_providers TEXT NOT NULL DEFAULT '[]',
                exclude_keywords TEXT NOT NULL DEFAULT '[]',
                exclude_tags TEXT NOT NULL DEFAULT '[]',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Channels the live listener accepts
        conn.execute(
            "CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}
