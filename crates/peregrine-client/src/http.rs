use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use peregrine_core::config::PlatformConfig;
use peregrine_core::types::{ProxyIdentity, SlotCandidate};

use crate::outcome::StepError;
use crate::wire::{
    BookToken, CalendarResponse, ConfirmResponse, Confirmation, DayAvailability, ReserveResponse,
    SearchResponse,
};
use crate::BookingPlatform;

const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// reqwest implementation of the booking protocol.
///
/// Every call goes out through the given egress identity: a fresh client
/// is built per call with `Proxy::all`, so an identity swap between
/// retries actually changes the egress address.
pub struct HttpPlatform {
    base_url: String,
    api_key: String,
    timeout: std::time::Duration,
}

impl HttpPlatform {
    pub fn new(cfg: &PlatformConfig) -> Self {
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            timeout: std::time::Duration::from_secs(cfg.request_timeout_secs),
        }
    }

    fn client_for(&self, proxy: &ProxyIdentity) -> Result<reqwest::Client, StepError> {
        let proxy = reqwest::Proxy::all(&proxy.addr)
            .map_err(|e| StepError::Transient(format!("bad proxy address: {e}")))?;
        reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(|e| StepError::Transient(format!("client build failed: {e}")))
    }

    fn auth_header(&self) -> String {
        format!("ResyAPI api_key=\"{}\"", self.api_key)
    }

    /// Send a prepared request and classify the response. Success yields
    /// the raw body; everything else becomes a tagged outcome.
    async fn dispatch(&self, builder: reqwest::RequestBuilder) -> Result<String, StepError> {
        let resp = builder.send().await.map_err(transport_error)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if (200..300).contains(&status) {
            return Ok(body);
        }
        warn!(status, "platform returned non-success");
        Err(match status {
            401 => StepError::Unauthorized { status },
            403 | 429 => StepError::Blocked { status, body },
            410 => StepError::SoldOut,
            500..=599 => StepError::Transient(format!("HTTP {status}")),
            _ => StepError::Malformed(format!("HTTP {status}: {body}")),
        })
    }
}

fn transport_error(e: reqwest::Error) -> StepError {
    // Timeouts and connection resets are retryable; anything else at the
    // transport layer is treated the same way — the next identity may
    // simply have a healthier route.
    StepError::Transient(e.to_string())
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, StepError> {
    serde_json::from_str(body).map_err(|e| StepError::Malformed(e.to_string()))
}

#[async_trait]
impl BookingPlatform for HttpPlatform {
    async fn fetch_calendar(
        &self,
        proxy: &ProxyIdentity,
        venue_id: &str,
        party_size: u32,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayAvailability>, StepError> {
        let client = self.client_for(proxy)?;
        debug!(venue_id, %start, %end, "calendar lookup");
        let query = [
            ("venue_id", venue_id.to_string()),
            ("num_seats", party_size.to_string()),
            ("start_date", start.to_string()),
            ("end_date", end.to_string()),
        ];
        let body = self
            .dispatch(
                client
                    .get(format!("{}/4/venue/calendar", self.base_url))
                    .header("authorization", self.auth_header())
                    .query(&query),
            )
            .await?;

        let parsed: CalendarResponse = parse_json(&body)?;
        let days = parsed
            .scheduled
            .into_iter()
            .filter_map(|day| {
                let date = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d").ok()?;
                Some(DayAvailability {
                    date,
                    status: day.inventory.reservation,
                })
            })
            .collect();
        Ok(days)
    }

    async fn search_slots(
        &self,
        proxy: &ProxyIdentity,
        venue_id: &str,
        date: NaiveDate,
        party_size: u32,
    ) -> Result<Vec<SlotCandidate>, StepError> {
        let client = self.client_for(proxy)?;
        debug!(venue_id, %date, party_size, "slot search");
        let query = [
            ("venue_id", venue_id.to_string()),
            ("day", date.to_string()),
            ("party_size", party_size.to_string()),
        ];
        let body = self
            .dispatch(
                client
                    .get(format!("{}/4/find", self.base_url))
                    .header("authorization", self.auth_header())
                    .query(&query),
            )
            .await?;

        let parsed: SearchResponse = parse_json(&body)?;
        let candidates = parsed
            .results
            .venues
            .into_iter()
            .flat_map(|v| v.slots)
            .filter(|slot| {
                if slot.config.token.is_empty() {
                    debug!("skipping slot with no config token");
                    return false;
                }
                true
            })
            .map(|slot| SlotCandidate {
                venue_id: venue_id.to_string(),
                date,
                time: slot.date.start,
                config_id: slot.config.token,
                table_type: slot.config.kind,
            })
            .collect();
        Ok(candidates)
    }

    async fn reserve_token(
        &self,
        proxy: &ProxyIdentity,
        auth_token: &str,
        config_id: &str,
        date: NaiveDate,
        party_size: u32,
    ) -> Result<BookToken, StepError> {
        let client = self.client_for(proxy)?;
        debug!(config_id, %date, "reserving book token");
        let body = self
            .dispatch(
                client
                    .post(format!("{}/3/details", self.base_url))
                    .header("authorization", self.auth_header())
                    .header("x-auth-token", auth_token)
                    .json(&serde_json::json!({
                        "config_id": config_id,
                        "day": date.to_string(),
                        "party_size": party_size,
                    })),
            )
            .await?;

        let parsed: ReserveResponse = parse_json(&body)?;
        if parsed.book_token.value.is_empty() {
            return Err(StepError::Malformed(
                "reserve response missing book token".to_string(),
            ));
        }
        let expires_at = parsed
            .book_token
            .date_expires
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, EXPIRY_FORMAT).ok());
        Ok(BookToken {
            value: parsed.book_token.value,
            expires_at,
        })
    }

    async fn confirm(
        &self,
        proxy: &ProxyIdentity,
        auth_token: &str,
        token: &BookToken,
        payment_method_id: &str,
    ) -> Result<Confirmation, StepError> {
        // A token that expired while we were backing off can never book;
        // transient classification sends the attempt back through
        // reserve-token rather than burning the confirm call.
        if let Some(expires_at) = token.expires_at {
            if expires_at <= Utc::now().naive_utc() {
                return Err(StepError::Transient("book token expired".to_string()));
            }
        }

        let client = self.client_for(proxy)?;
        debug!("submitting confirm");
        let body = self
            .dispatch(
                client
                    .post(format!("{}/3/book", self.base_url))
                    .header("authorization", self.auth_header())
                    .header("x-auth-token", auth_token)
                    .json(&serde_json::json!({
                        "book_token": token.value,
                        "struct_payment_method": { "id": payment_method_id },
                    })),
            )
            .await?;

        let parsed: ConfirmResponse = parse_json(&body)?;
        if parsed.status.as_deref() == Some("sold_out") {
            return Err(StepError::SoldOut);
        }
        let reservation_id = match parsed.reservation_id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(StepError::Malformed(
                    "confirm response missing reservation id".to_string(),
                ))
            }
        };
        Ok(Confirmation { reservation_id })
    }
}
