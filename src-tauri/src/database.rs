use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};

use crate::config::AppSettings;

/// Initialize the database and create tables if they don't exist
pub fn init_database(path: &Path) -> SqliteResult<Connection> {
    let conn = Connection::open(path)?;

    // Durable key-value storage for the session and the tunnel credential
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // App settings table (singleton pattern)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS app_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            settings_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

// ============================================================================
// Key-Value Store
// ============================================================================

pub fn kv_get(conn: &Connection, key: &str) -> SqliteResult<Option<String>> {
    conn.query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
}

pub fn kv_set(conn: &Connection, key: &str, value: &str) -> SqliteResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO kv_store (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        (key, value, &now),
    )?;
    Ok(())
}

/// Delete a key, returning whether it existed
pub fn kv_delete(conn: &Connection, key: &str) -> SqliteResult<bool> {
    let affected = conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
    Ok(affected > 0)
}

// ============================================================================
// App Settings Database Functions
// ============================================================================

/// Get app settings from the database (returns default if not set)
pub fn get_app_settings(conn: &Connection) -> SqliteResult<AppSettings> {
    let json: Option<String> = conn
        .query_row(
            "SELECT settings_json FROM app_settings WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match json {
        Some(json) => Ok(serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!("Stored settings are unreadable, using defaults: {}", e);
            AppSettings::default()
        })),
        None => Ok(AppSettings::default()),
    }
}

/// Insert or update app settings (upsert)
pub fn upsert_app_settings(conn: &Connection, settings: &AppSettings) -> SqliteResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let json = serde_json::to_string(settings)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "INSERT INTO app_settings (id, settings_json, created_at, updated_at)
         VALUES (1, ?1, ?2, ?2)
         ON CONFLICT(id) DO UPDATE SET
             settings_json = excluded.settings_json,
             updated_at = excluded.updated_at",
        (&json, &now),
    )?;

    Ok(())
}
