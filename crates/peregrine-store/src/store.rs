use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use tracing::info;

use peregrine_core::types::{
    AttemptRecord, AttemptStatus, ErrorRecord, ProxyClass, ProxyIdentity, Subscriber, Venue,
};

use crate::db::init_db;
use crate::error::{Result, StoreError};

/// Map a SELECT row (column order from VENUE_COLS) to a Venue.
/// Centralised here so every query in this crate stays consistent.
fn row_to_venue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Venue> {
    Ok(Venue {
        id: row.get(0)?,
        name: row.get(1)?,
        release_time: row.get(2)?,
        timezone: row.get(3)?,
        horizon_days: row.get(4)?,
        enabled: row.get::<_, i32>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const VENUE_COLS: &str =
    "id, name, release_time, timezone, horizon_days, enabled, created_at, updated_at";

fn row_to_subscriber(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscriber> {
    let table_types: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(8)?).unwrap_or_default();
    let weekdays: Vec<u8> = serde_json::from_str(&row.get::<_, String>(9)?).unwrap_or_default();
    Ok(Subscriber {
        id: row.get(0)?,
        display_name: row.get(1)?,
        auth_token: row.get(2)?,
        payment_method_id: row.get(3)?,
        venue_id: row.get(4)?,
        party_size: row.get(5)?,
        window_start: row.get(6)?,
        window_end: row.get(7)?,
        table_types,
        weekdays,
        enabled: row.get::<_, i32>(10)? != 0,
    })
}

const SUBSCRIBER_COLS: &str = "id, display_name, auth_token, payment_method_id, venue_id, \
     party_size, window_start, window_end, table_types, weekdays, enabled";

fn parse_instant(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Thread-safe store over a single SQLite connection.
///
/// Each subsystem in the daemon gets its own `Store` (and connection) so
/// audit appends from concurrent workflows never contend with another
/// subsystem's queries for long.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- venues ------------------------------------------------------------

    pub fn add_venue(&self, venue: &Venue) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO venues
             (id, name, release_time, timezone, horizon_days, enabled, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            rusqlite::params![
                venue.id,
                venue.name,
                venue.release_time,
                venue.timezone,
                venue.horizon_days,
                venue.enabled as i32,
                venue.created_at,
                venue.updated_at,
            ],
        )?;
        info!(venue_id = %venue.id, name = %venue.name, "venue saved");
        Ok(())
    }

    pub fn venue_by_id(&self, id: &str) -> Result<Option<Venue>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {VENUE_COLS} FROM venues WHERE id = ?1"))?;
        let mut rows = stmt.query_map([id], row_to_venue)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_enabled_venues(&self) -> Result<Vec<Venue>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VENUE_COLS} FROM venues WHERE enabled = 1 ORDER BY created_at"
        ))?;
        let venues = stmt
            .query_map([], row_to_venue)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(venues)
    }

    pub fn set_venue_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE venues SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![enabled as i32, now, id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "venue",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // --- subscribers -------------------------------------------------------

    pub fn add_subscriber(&self, sub: &Subscriber) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO subscribers
             (id, display_name, auth_token, payment_method_id, venue_id, party_size,
              window_start, window_end, table_types, weekdays, enabled)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            rusqlite::params![
                sub.id,
                sub.display_name,
                sub.auth_token,
                sub.payment_method_id,
                sub.venue_id,
                sub.party_size,
                sub.window_start,
                sub.window_end,
                serde_json::to_string(&sub.table_types)?,
                serde_json::to_string(&sub.weekdays)?,
                sub.enabled as i32,
            ],
        )?;
        Ok(())
    }

    /// Enabled subscribers of a venue, in stable id order. This is the
    /// snapshot the engine fans out over.
    pub fn subscribers_for_venue(&self, venue_id: &str) -> Result<Vec<Subscriber>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUBSCRIBER_COLS} FROM subscribers
             WHERE venue_id = ?1 AND enabled = 1 ORDER BY id"
        ))?;
        let subs = stmt
            .query_map([venue_id], row_to_subscriber)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(subs)
    }

    // --- proxies -----------------------------------------------------------

    pub fn add_proxy(&self, proxy: &ProxyIdentity) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO proxies
             (addr, class, enabled, last_used, rate_limited_until)
             VALUES (?1,?2,?3,?4,?5)",
            rusqlite::params![
                proxy.addr,
                proxy.class.to_string(),
                proxy.enabled as i32,
                proxy.last_used.map(|t| t.to_rfc3339()),
                proxy.rate_limited_until.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// All proxies, enabled or not — the pool applies eligibility itself.
    pub fn list_proxies(&self) -> Result<Vec<ProxyIdentity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT addr, class, enabled, last_used, rate_limited_until
             FROM proxies ORDER BY addr",
        )?;
        let proxies = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .filter_map(|r| {
                let (addr, class_str, enabled, last_used, limited) = r.ok()?;
                let class = ProxyClass::from_str(&class_str).ok()?;
                Some(ProxyIdentity {
                    addr,
                    class,
                    enabled: enabled != 0,
                    last_used: parse_instant(last_used),
                    rate_limited_until: parse_instant(limited),
                })
            })
            .collect();
        Ok(proxies)
    }

    // --- audit trail -------------------------------------------------------

    /// Append one terminal attempt record. Records are immutable: there
    /// is no update path.
    pub fn record_attempt(&self, rec: &AttemptRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO attempts
             (id, subscriber_id, venue_id, date, slot_minutes, status,
              reservation_id, error_summary, proxy_addr, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            rusqlite::params![
                rec.id,
                rec.subscriber_id,
                rec.venue_id,
                rec.date.to_string(),
                rec.slot_minutes,
                rec.status.to_string(),
                rec.reservation_id,
                rec.error_summary,
                rec.proxy_addr,
                rec.created_at,
            ],
        )?;
        Ok(())
    }

    /// Append one non-success remote response for post-hoc tuning.
    pub fn record_error(&self, rec: &ErrorRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO booking_errors
             (subscriber_id, venue_id, http_status, code, message, payload, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            rusqlite::params![
                rec.subscriber_id,
                rec.venue_id,
                rec.http_status,
                rec.code,
                rec.message,
                rec.payload,
                rec.created_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent attempts for a venue, newest first.
    pub fn recent_attempts(&self, venue_id: &str, limit: u32) -> Result<Vec<AttemptRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, subscriber_id, venue_id, date, slot_minutes, status,
                    reservation_id, error_summary, proxy_addr, created_at
             FROM attempts WHERE venue_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let attempts = stmt
            .query_map(rusqlite::params![venue_id, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<u16>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?
            .filter_map(|r| {
                let (
                    id,
                    subscriber_id,
                    venue_id,
                    date_str,
                    slot_minutes,
                    status_str,
                    reservation_id,
                    error_summary,
                    proxy_addr,
                    created_at,
                ) = r.ok()?;
                let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").ok()?;
                let status: AttemptStatus = status_str.parse().ok()?;
                Some(AttemptRecord {
                    id,
                    subscriber_id,
                    venue_id,
                    date,
                    slot_minutes,
                    status,
                    reservation_id,
                    error_summary,
                    proxy_addr,
                    created_at,
                })
            })
            .collect();
        Ok(attempts)
    }
}
