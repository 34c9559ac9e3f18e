use crate::core::error;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Document table of the SQLite-backed store. `cas` is bumped on every write.
pub const DOCUMENTS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        key TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        cas INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS store_meta (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
    INSERT OR IGNORE INTO store_meta (name, value) VALUES ('revision', 0);
";

pub fn db_connect(
    db_path: &str,
    busy_timeout: Duration,
) -> Result<Connection, error::DocmoveError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)
        .map_err(error::DocmoveError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::DocmoveError::RusqliteError)?;
    Ok(conn)
}

/// Opens (creating if needed) a document database at `db_path`.
pub fn initialize_documents_db(
    db_path: &Path,
    busy_timeout: Duration,
) -> Result<Connection, error::DocmoveError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(error::DocmoveError::IoError)?;
    }
    let conn = db_connect(&db_path.to_string_lossy(), busy_timeout)?;
    conn.execute_batch(DOCUMENTS_DB_SCHEMA)?;
    Ok(conn)
}
