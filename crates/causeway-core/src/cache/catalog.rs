//! Disk Cache Catalog
//!
//! SQLite bookkeeping for the disk tier. One row per cached fingerprint records the
//! source file state it was built from, the cache file holding the payload, its size
//! and access times. The catalog drives staleness sweeps by source path and LRU
//! eviction when the disk budget is exceeded.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;

/// Schema version for the catalog database
pub const CATALOG_SCHEMA_VERSION: &str = "1";

/// File name of the catalog inside the cache directory
pub const CATALOG_FILE_NAME: &str = "catalog.db";

/// SQL to create the entries table
pub const SCHEMA_CREATE_ENTRIES: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    fingerprint TEXT PRIMARY KEY NOT NULL,

    -- Source file state the payload was built from
    source_path TEXT NOT NULL,
    source_size INTEGER NOT NULL,
    source_mtime INTEGER NOT NULL,

    -- Payload file, relative to the cache directory
    file_name TEXT NOT NULL,
    byte_size INTEGER NOT NULL,

    -- Unix milliseconds
    created_at INTEGER NOT NULL,
    accessed_at INTEGER NOT NULL,

    hits INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL to create indexes
pub const SCHEMA_CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entries_source ON cache_entries(source_path);
CREATE INDEX IF NOT EXISTS idx_entries_accessed ON cache_entries(accessed_at);
"#;

/// SQL to create the metadata table
pub const SCHEMA_CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS catalog_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

const ENTRY_COLUMNS: &str = "fingerprint, source_path, source_size, source_mtime, file_name, \
                             byte_size, created_at, accessed_at, hits";

/// One catalog row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub fingerprint: String,
    pub source_path: String,
    pub source_size: u64,
    /// Nanoseconds since the epoch, clamped to the i64 range
    pub source_mtime: i64,
    pub file_name: String,
    pub byte_size: u64,
    pub created_at: i64,
    pub accessed_at: i64,
    pub hits: u64,
}

/// Clamp an i128 nanosecond timestamp to what SQLite can store
pub fn clamp_mtime(nanos: i128) -> i64 {
    nanos.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Thread-safe catalog connection
pub struct CacheCatalog {
    conn: Mutex<Connection>,
}

impl CacheCatalog {
    /// Open (creating if needed) the catalog at `path`
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::init(conn)
    }

    /// In-memory catalog (for tests)
    pub fn in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute(SCHEMA_CREATE_ENTRIES, [])?;
        conn.execute(SCHEMA_CREATE_METADATA, [])?;
        conn.execute_batch(SCHEMA_CREATE_INDEXES)?;
        conn.execute(
            "INSERT OR IGNORE INTO catalog_metadata (key, value) VALUES ('schema_version', ?1)",
            [CATALOG_SCHEMA_VERSION],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure_connection(conn: &Connection) -> SqliteResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    pub fn schema_version(&self) -> SqliteResult<Option<String>> {
        self.conn
            .lock()
            .query_row(
                "SELECT value FROM catalog_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
    }

    /// Insert or replace an entry
    pub fn upsert(&self, entry: &CatalogEntry) -> SqliteResult<()> {
        self.conn.lock().execute(
            &format!(
                "INSERT OR REPLACE INTO cache_entries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                ENTRY_COLUMNS
            ),
            params![
                entry.fingerprint,
                entry.source_path,
                entry.source_size as i64,
                entry.source_mtime,
                entry.file_name,
                entry.byte_size as i64,
                entry.created_at,
                entry.accessed_at,
                entry.hits as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, fingerprint: &str) -> SqliteResult<Option<CatalogEntry>> {
        self.conn
            .lock()
            .query_row(
                &format!(
                    "SELECT {} FROM cache_entries WHERE fingerprint = ?1",
                    ENTRY_COLUMNS
                ),
                [fingerprint],
                Self::row_to_entry,
            )
            .optional()
    }

    /// Record an access
    pub fn touch(&self, fingerprint: &str, now: i64) -> SqliteResult<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE cache_entries SET accessed_at = ?2, hits = hits + 1 WHERE fingerprint = ?1",
            params![fingerprint, now],
        )?;
        Ok(changed > 0)
    }

    pub fn remove(&self, fingerprint: &str) -> SqliteResult<bool> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM cache_entries WHERE fingerprint = ?1", [fingerprint])?;
        Ok(changed > 0)
    }

    /// All entries built from a source path
    pub fn entries_for_source(&self, source_path: &str) -> SqliteResult<Vec<CatalogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM cache_entries WHERE source_path = ?1",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt.query_map([source_path], Self::row_to_entry)?;
        rows.collect()
    }

    /// All entries, least recently accessed first
    pub fn entries_lru(&self) -> SqliteResult<Vec<CatalogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM cache_entries ORDER BY accessed_at ASC, rowid ASC",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_entry)?;
        rows.collect()
    }

    pub fn count(&self) -> SqliteResult<usize> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn total_bytes(&self) -> SqliteResult<u64> {
        let total: i64 = self.conn.lock().query_row(
            "SELECT COALESCE(SUM(byte_size), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    pub fn clear(&self) -> SqliteResult<usize> {
        self.conn.lock().execute("DELETE FROM cache_entries", [])
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> SqliteResult<CatalogEntry> {
        Ok(CatalogEntry {
            fingerprint: row.get(0)?,
            source_path: row.get(1)?,
            source_size: row.get::<_, i64>(2)? as u64,
            source_mtime: row.get(3)?,
            file_name: row.get(4)?,
            byte_size: row.get::<_, i64>(5)? as u64,
            created_at: row.get(6)?,
            accessed_at: row.get(7)?,
            hits: row.get::<_, i64>(8)? as u64,
        })
    }
}
