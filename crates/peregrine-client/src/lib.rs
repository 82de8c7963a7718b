//! `peregrine-client` — the four-step remote booking protocol and the
//! retry/rotation machinery around it.
//!
//! # Protocol steps
//!
//! | Step          | Purpose                                             |
//! |---------------|-----------------------------------------------------|
//! | Calendar      | Which forward dates have bookable inventory         |
//! | Search        | Bookable slots for one date and party size          |
//! | Reserve-token | Short-lived book token for a chosen slot            |
//! | Confirm       | Finalize with token + payment method                |
//!
//! Every network call is classified into a tagged [`StepError`] outcome;
//! the [`Executor`] drives one step to a terminal result, rotating egress
//! identities and backing off per [`RetryPolicy`]. The coordinator never
//! sees a raw transport error.

pub mod executor;
pub mod http;
pub mod outcome;
pub mod wire;

pub use executor::{Executor, RetryPolicy, StepTrace};
pub use http::HttpPlatform;
pub use outcome::{RemoteFailure, RetryClass, StepError};
pub use wire::{BookToken, Confirmation, DayAvailability};

use async_trait::async_trait;
use chrono::NaiveDate;
use peregrine_core::types::{ProxyIdentity, SlotCandidate};

/// The remote booking platform, one method per protocol step.
///
/// Implemented by [`HttpPlatform`] for the real service and by scripted
/// fakes in coordinator tests.
#[async_trait]
pub trait BookingPlatform: Send + Sync {
    /// Inventory status per date over a forward range.
    async fn fetch_calendar(
        &self,
        proxy: &ProxyIdentity,
        venue_id: &str,
        party_size: u32,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayAvailability>, StepError>;

    /// Bookable slots for one date and party size.
    async fn search_slots(
        &self,
        proxy: &ProxyIdentity,
        venue_id: &str,
        date: NaiveDate,
        party_size: u32,
    ) -> Result<Vec<SlotCandidate>, StepError>;

    /// Exchange a slot's config token for a short-lived book token.
    async fn reserve_token(
        &self,
        proxy: &ProxyIdentity,
        auth_token: &str,
        config_id: &str,
        date: NaiveDate,
        party_size: u32,
    ) -> Result<BookToken, StepError>;

    /// Submit the book token and payment reference; success yields the
    /// remote reservation id.
    async fn confirm(
        &self,
        proxy: &ProxyIdentity,
        auth_token: &str,
        token: &BookToken,
        payment_method_id: &str,
    ) -> Result<Confirmation, StepError>;
}
