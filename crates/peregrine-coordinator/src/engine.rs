use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use peregrine_client::{BookingPlatform, Executor, RemoteFailure, StepError};
use peregrine_core::config::BookingConfig;
use peregrine_core::types::{
    AttemptRecord, AttemptStatus, ClaimKey, ErrorRecord, ProxyClass, SlotCandidate, Subscriber,
    Venue,
};
use peregrine_store::Store;
use peregrine_trigger::release::{forward_window, target_date};

use crate::cache::SearchCache;
use crate::claim::ClaimTable;
use crate::filter::{RankedSlot, SlotFilter};

/// Everything one release event shares across its subscriber tasks.
/// Calendar and search results are populated single-flight and read-only
/// afterwards; nothing here outlives the event.
struct EventContext {
    venue: Venue,
    scan_dates: Vec<NaiveDate>,
    /// The newly bookable date, used for audit records that never reach
    /// slot selection.
    target: NaiveDate,
    /// Dates with "available" inventory, populated by the first
    /// subscriber task that needs them.
    calendar: OnceCell<Arc<HashSet<NaiveDate>>>,
    search: SearchCache,
}

/// Which pipeline step a terminal failure happened in — decides whether
/// the claim goes back to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelinePhase {
    Reserve,
    Confirm,
}

/// Terminal result of one subscriber workflow, folded into exactly one
/// attempt record.
struct WorkflowOutcome {
    date: NaiveDate,
    slot_minutes: Option<u16>,
    status: AttemptStatus,
    reservation_id: Option<String>,
    error_summary: Option<String>,
    proxy_addr: Option<String>,
    failures: Vec<RemoteFailure>,
}

impl WorkflowOutcome {
    fn failed(date: NaiveDate, summary: impl Into<String>, failures: Vec<RemoteFailure>) -> Self {
        Self {
            date,
            slot_minutes: None,
            status: AttemptStatus::Failed,
            reservation_id: None,
            error_summary: Some(summary.into()),
            proxy_addr: None,
            failures,
        }
    }
}

/// Orchestrates one release event: fresh snapshot, shared discovery,
/// one concurrent task per subscriber, claim-guarded execution, audit.
pub struct ReleaseEngine {
    store: Arc<Store>,
    platform: Arc<dyn BookingPlatform>,
    executor: Arc<Executor>,
    claims: Arc<ClaimTable>,
    booking: BookingConfig,
}

impl ReleaseEngine {
    pub fn new(
        store: Arc<Store>,
        platform: Arc<dyn BookingPlatform>,
        executor: Arc<Executor>,
        claims: Arc<ClaimTable>,
        booking: BookingConfig,
    ) -> Self {
        Self {
            store,
            platform,
            executor,
            claims,
            booking,
        }
    }

    /// Entry point, invoked by the time trigger: run the release event
    /// for one venue. Venue and subscribers are re-read here so edits
    /// made since scheduling take effect — a venue disabled in the
    /// meantime makes the fired event a no-op.
    pub async fn run_release_event(self: Arc<Self>, venue_id: &str) {
        let venue = match self.store.venue_by_id(venue_id) {
            Ok(Some(v)) if v.enabled => v,
            Ok(_) => {
                info!(venue_id, "venue missing or disabled — release event is a no-op");
                return;
            }
            Err(e) => {
                error!(venue_id, "venue snapshot failed: {e}");
                return;
            }
        };
        let subscribers = match self.store.subscribers_for_venue(venue_id) {
            Ok(subs) if !subs.is_empty() => subs,
            Ok(_) => {
                info!(venue_id, "no enabled subscribers — nothing to do");
                return;
            }
            Err(e) => {
                error!(venue_id, "subscriber snapshot failed: {e}");
                return;
            }
        };

        let now = Utc::now();
        let scan_dates = match forward_window(&venue.timezone, venue.horizon_days, now) {
            Ok(dates) if !dates.is_empty() => dates,
            Ok(_) | Err(_) => {
                error!(venue_id, tz = %venue.timezone, "cannot compute scan window");
                return;
            }
        };
        let target = match target_date(&venue.timezone, venue.horizon_days, now) {
            Ok(d) => d,
            Err(e) => {
                error!(venue_id, "cannot compute target date: {e}");
                return;
            }
        };

        info!(
            venue_id,
            venue = %venue.name,
            subscribers = subscribers.len(),
            %target,
            "release event started"
        );

        let ctx = Arc::new(EventContext {
            venue,
            scan_dates,
            target,
            calendar: OnceCell::new(),
            search: SearchCache::new(),
        });

        let mut handles = Vec::with_capacity(subscribers.len());
        for sub in subscribers {
            let engine = Arc::clone(&self);
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(async move {
                engine.run_subscriber(ctx, sub).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!(venue_id, "subscriber task panicked: {e}");
            }
        }

        // End of this event's processing window.
        self.claims.release_all();
        info!(venue_id, "release event complete");
    }

    /// One subscriber task: drive the workflow to a terminal status and
    /// write exactly one attempt record plus any error records.
    async fn run_subscriber(&self, ctx: Arc<EventContext>, sub: Subscriber) {
        let outcome = self.subscriber_workflow(&ctx, &sub).await;
        info!(
            subscriber_id = %sub.id,
            status = %outcome.status,
            "subscriber workflow terminal"
        );

        let record = AttemptRecord {
            id: Uuid::new_v4().to_string(),
            subscriber_id: sub.id.clone(),
            venue_id: ctx.venue.id.clone(),
            date: outcome.date,
            slot_minutes: outcome.slot_minutes,
            status: outcome.status,
            reservation_id: outcome.reservation_id,
            error_summary: outcome.error_summary,
            proxy_addr: outcome.proxy_addr,
            created_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.store.record_attempt(&record) {
            error!(subscriber_id = %sub.id, "attempt record write failed: {e}");
        }

        for failure in &outcome.failures {
            let rec = ErrorRecord {
                subscriber_id: sub.id.clone(),
                venue_id: ctx.venue.id.clone(),
                http_status: failure.http_status,
                code: failure.code.to_string(),
                message: format!("{}: {}", failure.step, failure.message),
                payload: failure.payload.clone(),
                created_at: Utc::now().to_rfc3339(),
            };
            if let Err(e) = self.store.record_error(&rec) {
                error!(subscriber_id = %sub.id, "error record write failed: {e}");
            }
        }
    }

    /// Idle → Discovering → Filtering → Claiming → Executing → terminal.
    async fn subscriber_workflow(
        &self,
        ctx: &Arc<EventContext>,
        sub: &Subscriber,
    ) -> WorkflowOutcome {
        // A subscriber whose stored window doesn't parse can never match
        // anything; abort this workflow only.
        let filter = match SlotFilter::for_subscriber(sub) {
            Ok(f) => f,
            Err(e) => {
                return WorkflowOutcome::failed(
                    ctx.target,
                    format!("invalid preferences: {e}"),
                    Vec::new(),
                )
            }
        };

        let mut failures: Vec<RemoteFailure> = Vec::new();

        let open_dates = match self.ensure_calendar(ctx, sub, &mut failures).await {
            Ok(dates) => dates,
            Err(err) => {
                return WorkflowOutcome::failed(
                    ctx.target,
                    format!("discover failed: {err}"),
                    failures,
                )
            }
        };

        let mut ranked: Vec<RankedSlot> = Vec::new();
        for date in ctx.scan_dates.iter().copied() {
            // A date without "available" inventory is never searched.
            if !open_dates.contains(&date) {
                continue;
            }
            // Weekday preference cuts the search before it happens.
            if !filter.weekday_allowed(date) {
                debug!(subscriber_id = %sub.id, %date, "weekday excluded");
                continue;
            }
            match self.search_date(ctx, sub, date, &mut failures).await {
                Ok(slots) => ranked.extend(filter.filter_ranked(&slots)),
                Err(err) => {
                    warn!(subscriber_id = %sub.id, %date, "search failed: {err}");
                }
            }
        }
        ranked.sort_by_key(|slot| (slot.candidate.date, slot.minutes));

        if ranked.is_empty() {
            return WorkflowOutcome::failed(ctx.target, "no matching slots", failures);
        }

        // Earliest candidate first; a claim conflict is normal control
        // flow — fall through to the next candidate.
        for slot in ranked {
            let key = ClaimKey {
                venue_id: ctx.venue.id.clone(),
                date: slot.candidate.date,
                minutes: slot.minutes,
            };
            if !self.claims.try_claim(&key, &sub.id) {
                debug!(subscriber_id = %sub.id, minutes = slot.minutes, "claim conflict — next candidate");
                continue;
            }
            return self.execute_claimed(sub, &slot.candidate, &key, failures).await;
        }

        WorkflowOutcome::failed(ctx.target, "all matching slots already claimed", failures)
    }

    /// Shared discovery: the first subscriber task to get here performs
    /// the calendar call; everyone else awaits the same cell. A failed
    /// call is not cached, so the next task retries.
    async fn ensure_calendar(
        &self,
        ctx: &Arc<EventContext>,
        sub: &Subscriber,
        failures: &mut Vec<RemoteFailure>,
    ) -> Result<Arc<HashSet<NaiveDate>>, StepError> {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let result = ctx
            .calendar
            .get_or_try_init(|| {
                let engine = self;
                let collected = Arc::clone(&collected);
                let venue_id = ctx.venue.id.clone();
                let party_size = sub.party_size;
                let start = ctx.scan_dates[0];
                let end = ctx.scan_dates[ctx.scan_dates.len() - 1];
                async move {
                    let platform = engine.platform.clone();
                    let (result, trace) = engine
                        .executor
                        .run("calendar", None, move |proxy| {
                            let platform = platform.clone();
                            let venue_id = venue_id.clone();
                            async move {
                                platform
                                    .fetch_calendar(&proxy, &venue_id, party_size, start, end)
                                    .await
                            }
                        })
                        .await;
                    collected.lock().unwrap().extend(trace.failures);
                    result.map(|days| {
                        let open: HashSet<NaiveDate> = days
                            .iter()
                            .filter(|d| d.is_available())
                            .map(|d| d.date)
                            .collect();
                        info!(open = open.len(), total = days.len(), "calendar discovered");
                        Arc::new(open)
                    })
                }
            })
            .await
            .cloned();
        failures.append(&mut collected.lock().unwrap());
        result
    }

    /// Shared slot search for one (date, party size), single-flight
    /// through the event cache.
    async fn search_date(
        &self,
        ctx: &Arc<EventContext>,
        sub: &Subscriber,
        date: NaiveDate,
        failures: &mut Vec<RemoteFailure>,
    ) -> Result<Arc<Vec<SlotCandidate>>, StepError> {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let result = ctx
            .search
            .get_or_fetch(date, sub.party_size, || {
                let engine = self;
                let collected = Arc::clone(&collected);
                let venue_id = ctx.venue.id.clone();
                let party_size = sub.party_size;
                async move {
                    let platform = engine.platform.clone();
                    let (result, trace) = engine
                        .executor
                        .run("search", None, move |proxy| {
                            let platform = platform.clone();
                            let venue_id = venue_id.clone();
                            async move {
                                platform.search_slots(&proxy, &venue_id, date, party_size).await
                            }
                        })
                        .await;
                    collected.lock().unwrap().extend(trace.failures);
                    result
                }
            })
            .await;
        failures.append(&mut collected.lock().unwrap());
        result
    }

    /// Reserve-token then confirm for a claimed slot. Both steps prefer
    /// residential identities — they face the strictest traffic
    /// filtering on the platform side.
    async fn execute_claimed(
        &self,
        sub: &Subscriber,
        candidate: &SlotCandidate,
        key: &ClaimKey,
        mut failures: Vec<RemoteFailure>,
    ) -> WorkflowOutcome {
        info!(
            subscriber_id = %sub.id,
            date = %key.date,
            minutes = key.minutes,
            "executing booking"
        );

        let platform = self.platform.clone();
        let auth = sub.auth_token.clone();
        let config_id = candidate.config_id.clone();
        let date = candidate.date;
        let party_size = sub.party_size;
        let (token_result, trace) = self
            .executor
            .run("reserve", Some(ProxyClass::Residential), move |proxy| {
                let platform = platform.clone();
                let auth = auth.clone();
                let config_id = config_id.clone();
                async move {
                    platform
                        .reserve_token(&proxy, &auth, &config_id, date, party_size)
                        .await
                }
            })
            .await;
        let mut proxy_addr = trace.last_proxy;
        failures.extend(trace.failures);

        let token = match token_result {
            Ok(t) => Arc::new(t),
            Err(err) => {
                return self.terminal_failure(sub, key, err, PipelinePhase::Reserve, proxy_addr, failures)
            }
        };

        let platform = self.platform.clone();
        let auth = sub.auth_token.clone();
        let payment = sub.payment_method_id.clone();
        let token_ref = Arc::clone(&token);
        let (confirm_result, trace) = self
            .executor
            .run("confirm", Some(ProxyClass::Residential), move |proxy| {
                let platform = platform.clone();
                let auth = auth.clone();
                let payment = payment.clone();
                let token = Arc::clone(&token_ref);
                async move { platform.confirm(&proxy, &auth, &token, &payment).await }
            })
            .await;
        if trace.last_proxy.is_some() {
            proxy_addr = trace.last_proxy;
        }
        failures.extend(trace.failures);

        match confirm_result {
            Ok(confirmation) => {
                info!(
                    subscriber_id = %sub.id,
                    reservation_id = %confirmation.reservation_id,
                    "booking confirmed"
                );
                WorkflowOutcome {
                    date,
                    slot_minutes: Some(key.minutes),
                    status: AttemptStatus::Success,
                    reservation_id: Some(confirmation.reservation_id),
                    error_summary: None,
                    proxy_addr,
                    failures,
                }
            }
            Err(err) => {
                self.terminal_failure(sub, key, err, PipelinePhase::Confirm, proxy_addr, failures)
            }
        }
    }

    /// Map a terminal step error onto the workflow outcome and apply the
    /// claim policy: sold-out claims are never handed back; a failure
    /// before the slot could have been consumed releases the claim; a
    /// confirm-step failure releases it only when configured to, since
    /// the platform may have partially processed the booking.
    fn terminal_failure(
        &self,
        sub: &Subscriber,
        key: &ClaimKey,
        err: StepError,
        phase: PipelinePhase,
        proxy_addr: Option<String>,
        failures: Vec<RemoteFailure>,
    ) -> WorkflowOutcome {
        let status = match err {
            StepError::SoldOut => AttemptStatus::SoldOut,
            _ => AttemptStatus::Failed,
        };

        if status == AttemptStatus::Failed {
            let release = match phase {
                PipelinePhase::Reserve => true,
                PipelinePhase::Confirm => self.booking.release_claim_on_confirm_failure,
            };
            if release {
                self.claims.release(key, &sub.id);
            }
        }

        WorkflowOutcome {
            date: key.date,
            slot_minutes: Some(key.minutes),
            status,
            reservation_id: None,
            error_summary: Some(err.to_string()),
            proxy_addr,
            failures,
        }
    }
}
