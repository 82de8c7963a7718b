//! Loosely-typed payloads for the remote protocol. Only the fields the
//! pipeline consumes are modeled; unrecognized fields are ignored so
//! upstream schema drift never turns into an error.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

/// Inventory status for one forward date, from the calendar step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    /// Platform-reported reservation status, e.g. "available",
    /// "sold-out", "closed".
    pub status: String,
}

impl DayAvailability {
    /// Only "available" dates are worth a search call.
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }
}

/// Short-lived credential from the reserve-token step; the confirm step
/// must present it before it expires.
#[derive(Debug, Clone)]
pub struct BookToken {
    pub value: String,
    /// Platform-local expiry, when the platform reported one.
    pub expires_at: Option<NaiveDateTime>,
}

/// Outcome of a successful confirm step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub reservation_id: String,
}

// --- raw response shapes ---------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CalendarResponse {
    #[serde(default)]
    pub scheduled: Vec<CalendarDay>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CalendarDay {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub inventory: CalendarInventory,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CalendarInventory {
    #[serde(default)]
    pub reservation: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub results: SearchResults,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchResults {
    #[serde(default)]
    pub venues: Vec<SearchVenue>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchVenue {
    #[serde(default)]
    pub slots: Vec<SearchSlot>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchSlot {
    #[serde(default)]
    pub config: SlotConfig,
    #[serde(default)]
    pub date: SlotDate,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SlotConfig {
    /// Opaque token consumed by the reserve-token step.
    #[serde(default)]
    pub token: String,
    /// Table/area label, e.g. "Dining Room", "Patio".
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SlotDate {
    /// Full date-time string, "YYYY-MM-DD HH:MM:SS".
    #[serde(default)]
    pub start: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReserveResponse {
    #[serde(default)]
    pub book_token: RawBookToken,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawBookToken {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub date_expires: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConfirmResponse {
    #[serde(default)]
    pub reservation_id: Option<serde_json::Value>,
    /// Some responses carry a status string instead of an id when the
    /// slot was consumed elsewhere mid-confirm.
    #[serde(default)]
    pub status: Option<String>,
}
