use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, unixepoch())",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS holders (
    holder_id TEXT PRIMARY KEY CHECK (length(holder_id) > 0),
    display_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS authorities (
    authority_id TEXT PRIMARY KEY CHECK (length(authority_id) > 0),
    display_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS authority_villages (
    authority_id TEXT NOT NULL REFERENCES authorities (authority_id) ON DELETE CASCADE,
    village TEXT NOT NULL,
    PRIMARY KEY (authority_id, village)
);
CREATE INDEX IF NOT EXISTS idx_authority_villages_village ON authority_villages (village);

CREATE TABLE IF NOT EXISTS parcels (
    parcel_id TEXT PRIMARY KEY CHECK (length(parcel_id) > 0),
    village TEXT NOT NULL,
    area REAL NOT NULL CHECK (area > 0),
    boundary BLOB NOT NULL,
    owner_id TEXT REFERENCES holders (holder_id),
    cultivator_id TEXT REFERENCES holders (holder_id)
);
CREATE INDEX IF NOT EXISTS idx_parcels_village ON parcels (village);
CREATE INDEX IF NOT EXISTS idx_parcels_owner ON parcels (owner_id, village) WHERE owner_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_parcels_cultivator ON parcels (cultivator_id, village) WHERE cultivator_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY,
    entry_id BLOB NOT NULL UNIQUE CHECK (length(entry_id) = 16),
    category TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    action TEXT NOT NULL,
    details BLOB NOT NULL,
    prev_hash BLOB CHECK (prev_hash IS NULL OR length(prev_hash) = 32),
    entry_hash BLOB NOT NULL CHECK (length(entry_hash) = 32),
    signer BLOB NOT NULL CHECK (length(signer) = 32),
    signature BLOB NOT NULL CHECK (length(signature) = 64),
    recorded_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit log is append-only');
END;
CREATE TRIGGER IF NOT EXISTS audit_log_no_delete BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit log is append-only');
END;
";
