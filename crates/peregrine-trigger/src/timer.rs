use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::release::next_release_instant;

/// One firing of a venue's release timer, handed to the event runner.
#[derive(Debug, Clone)]
pub struct ReleaseFire {
    pub venue_id: String,
    /// The scheduled instant, not the (marginally later) delivery time.
    pub released_at: DateTime<Utc>,
}

/// Longest single sleep between wall-clock rechecks. Keeps the wait
/// anchored to the absolute target across suspend/clock adjustments.
const MAX_SLEEP_CHUNK_SECS: i64 = 30;

/// Sleep until `target`, recomputing the remaining duration from the
/// wall clock each chunk so the wait tracks the absolute instant rather
/// than an elapsed-duration estimate.
///
/// Returns `true` when the instant arrived, `false` when shutdown fired
/// first — the caller must not run the release event in that case.
pub async fn wait_until(target: DateTime<Utc>, shutdown: &mut watch::Receiver<bool>) -> bool {
    loop {
        let remaining = target - Utc::now();
        if remaining <= Duration::zero() {
            return true;
        }
        let chunk = remaining
            .min(Duration::seconds(MAX_SLEEP_CHUNK_SECS))
            .to_std()
            .unwrap_or(std::time::Duration::from_millis(1));
        tokio::select! {
            _ = tokio::time::sleep(chunk) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

/// Per-venue timer loop: arm, wait, fire, re-arm for the next day.
pub struct TriggerLoop {
    venue_id: String,
    release_time: String,
    timezone: String,
    /// Fire once and stop instead of re-arming daily.
    run_once: bool,
    fired_tx: mpsc::Sender<ReleaseFire>,
}

impl TriggerLoop {
    pub fn new(
        venue_id: impl Into<String>,
        release_time: impl Into<String>,
        timezone: impl Into<String>,
        run_once: bool,
        fired_tx: mpsc::Sender<ReleaseFire>,
    ) -> Self {
        Self {
            venue_id: venue_id.into(),
            release_time: release_time.into(),
            timezone: timezone.into(),
            run_once,
            fired_tx,
        }
    }

    /// Run until shutdown broadcasts `true` (or after one fire in
    /// run-once mode). A venue with an unparsable release time or
    /// timezone logs and exits — it can never fire.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let target =
                match next_release_instant(&self.release_time, &self.timezone, Utc::now()) {
                    Ok(t) => t,
                    Err(e) => {
                        error!(venue_id = %self.venue_id, "cannot arm release timer: {e}");
                        return;
                    }
                };
            info!(venue_id = %self.venue_id, target = %target, "release timer armed");

            if !wait_until(target, &mut shutdown).await {
                info!(venue_id = %self.venue_id, "release timer cancelled");
                return;
            }

            let fire = ReleaseFire {
                venue_id: self.venue_id.clone(),
                released_at: target,
            };
            // try_send never blocks the timer; the runner draining the
            // channel falling this far behind is itself the incident.
            if self.fired_tx.try_send(fire).is_err() {
                warn!(venue_id = %self.venue_id, "fire channel full or closed — release dropped");
            }

            if self.run_once {
                info!(venue_id = %self.venue_id, "run-once timer done");
                return;
            }
        }
    }
}
