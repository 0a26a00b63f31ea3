//! User preference store — a small key/value table with typed accessors
//! for the flags the pipeline consults.

use rusqlite::Connection;

use crate::db::DatabaseError;

/// Whether cloud validation of classifications is enabled.
pub const KEY_EXTERNAL_VALIDATION: &str = "use_external_validation";

/// Get a preference by key. Returns None if not set.
pub fn get_preference(conn: &Connection, key: &str) -> Result<Option<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT value FROM preferences WHERE key = ?1")?;
    match stmt.query_row([key], |row| row.get::<_, String>(0)) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

/// Set a preference (upsert).
pub fn set_preference(conn: &Connection, key: &str, value: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO preferences (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = ?2",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

/// Delete a preference.
pub fn delete_preference(conn: &Connection, key: &str) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM preferences WHERE key = ?1", [key])?;
    Ok(())
}

/// Whether cloud validation should run.
///
/// Missing row = enabled (default on). Only an explicit "false" disables.
pub fn use_external_validation(conn: &Connection) -> Result<bool, DatabaseError> {
    Ok(get_preference(conn, KEY_EXTERNAL_VALIDATION)?
        .map(|v| v != "false")
        .unwrap_or(true))
}

pub fn set_use_external_validation(
    conn: &Connection,
    enabled: bool,
) -> Result<(), DatabaseError> {
    set_preference(
        conn,
        KEY_EXTERNAL_VALIDATION,
        if enabled { "true" } else { "false" },
    )
}
