use rusqlite::Connection;

use crate::error::Result;

/// Initialise all tables for the peregrine store. Safe to call on every
/// startup — CREATE IF NOT EXISTS means it's idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_config_tables(conn)?;
    create_audit_tables(conn)?;
    Ok(())
}

fn create_config_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS venues (
            id            TEXT PRIMARY KEY NOT NULL,
            name          TEXT NOT NULL,
            release_time  TEXT NOT NULL,               -- 'HH:MM' or 'HH:MM:SS' local
            timezone      TEXT NOT NULL DEFAULT 'UTC', -- IANA name
            horizon_days  INTEGER NOT NULL DEFAULT 0,
            enabled       INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subscribers (
            id                 TEXT PRIMARY KEY NOT NULL,
            display_name       TEXT NOT NULL,
            auth_token         TEXT NOT NULL,
            payment_method_id  TEXT NOT NULL,
            venue_id           TEXT NOT NULL REFERENCES venues(id),
            party_size         INTEGER NOT NULL,
            window_start       TEXT NOT NULL,          -- 'HH:MM'
            window_end         TEXT NOT NULL,          -- 'HH:MM', may wrap midnight
            table_types        TEXT NOT NULL DEFAULT '[]',  -- JSON array
            weekdays           TEXT NOT NULL DEFAULT '[]',  -- JSON array, 0=Mon
            enabled            INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_subscribers_venue
            ON subscribers (venue_id, enabled);

        CREATE TABLE IF NOT EXISTS proxies (
            addr                TEXT PRIMARY KEY NOT NULL,
            class               TEXT NOT NULL DEFAULT 'datacenter',
            enabled             INTEGER NOT NULL DEFAULT 1,
            last_used           TEXT,                  -- ISO-8601 or NULL
            rate_limited_until  TEXT                   -- ISO-8601 or NULL
        );",
    )?;
    Ok(())
}

fn create_audit_tables(conn: &Connection) -> Result<()> {
    // Append-only. The engine writes each attempt exactly once, after the
    // workflow reaches a terminal status.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS attempts (
            id              TEXT    NOT NULL PRIMARY KEY,
            subscriber_id   TEXT    NOT NULL,
            venue_id        TEXT    NOT NULL,
            date            TEXT    NOT NULL,   -- 'YYYY-MM-DD'
            slot_minutes    INTEGER,            -- NULL before slot selection
            status          TEXT    NOT NULL,
            reservation_id  TEXT,
            error_summary   TEXT,
            proxy_addr      TEXT,
            created_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_attempts_venue
            ON attempts (venue_id, created_at);

        CREATE TABLE IF NOT EXISTS booking_errors (
            id             INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            subscriber_id  TEXT    NOT NULL,
            venue_id       TEXT    NOT NULL,
            http_status    INTEGER,
            code           TEXT    NOT NULL,
            message        TEXT    NOT NULL,
            payload        TEXT,
            created_at     TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
