use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use peregrine_core::config::BookingConfig;
use peregrine_core::types::{ProxyClass, ProxyIdentity};
use peregrine_proxy::ProxyPool;

use crate::outcome::{RemoteFailure, RetryClass, StepError};

/// Retry and backoff tuning, lifted from [`BookingConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries per step across proxy rotations.
    pub max_attempts: u32,
    /// Same-proxy retries for transient failures before escalating to
    /// rotation.
    pub transient_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Cooldown applied to a blocked identity.
    pub proxy_cooldown: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &BookingConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            transient_retries: cfg.transient_retries,
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            backoff_cap: Duration::from_millis(cfg.backoff_cap_ms),
            proxy_cooldown: Duration::from_secs(cfg.proxy_cooldown_secs),
        }
    }

    /// Exponentially increasing delay with a cap: base * 2^n.
    fn backoff_delay(&self, rotation: u32) -> Duration {
        let factor = 2u32.saturating_pow(rotation.min(10));
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

/// What the executor observed while driving a step: every non-success
/// response (recovered or not) and the identity the final call went out
/// on. The coordinator turns the failures into error audit records.
#[derive(Debug, Default)]
pub struct StepTrace {
    pub failures: Vec<RemoteFailure>,
    pub last_proxy: Option<String>,
}

impl StepTrace {
    pub fn absorb(&mut self, other: StepTrace) {
        self.failures.extend(other.failures);
        if other.last_proxy.is_some() {
            self.last_proxy = other.last_proxy;
        }
    }
}

/// Drives one network step to a terminal result.
///
/// Blocked outcomes rotate to a fresh egress identity (cooling the old
/// one down) with exponential backoff; transient outcomes retry on the
/// same identity a smaller fixed number of times before escalating to
/// the same rotation path; sold-out, unauthorized, and malformed
/// outcomes short-circuit immediately.
pub struct Executor {
    pool: Arc<ProxyPool>,
    policy: RetryPolicy,
}

impl Executor {
    pub fn new(pool: Arc<ProxyPool>, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, exhausts the retry budget, or hits
    /// a terminal outcome. The closure is invoked with the identity to
    /// use for that try.
    pub async fn run<T, F, Fut>(
        &self,
        step: &'static str,
        preferred: Option<ProxyClass>,
        mut call: F,
    ) -> (Result<T, StepError>, StepTrace)
    where
        F: FnMut(ProxyIdentity) -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let mut trace = StepTrace::default();

        let mut current = match self.pool.acquire(preferred) {
            Some(p) => p,
            None => {
                trace
                    .failures
                    .push(RemoteFailure::from_step_error(step, &StepError::ProxyExhausted));
                return (Err(StepError::ProxyExhausted), trace);
            }
        };

        let mut attempt = 0u32;
        let mut rotations = 0u32;
        let mut same_proxy_left = self.policy.transient_retries;

        loop {
            attempt += 1;
            trace.last_proxy = Some(current.addr.clone());
            let result = call(current.clone()).await;
            // Fair rotation: the identity is stamped used whether the
            // call succeeded or not.
            self.pool.mark_used(&current.addr);

            let err = match result {
                Ok(value) => {
                    debug!(step, attempt, "step succeeded");
                    return (Ok(value), trace);
                }
                Err(e) => e,
            };
            warn!(step, attempt, proxy = %current.addr, error = %err, "step failed");
            trace.failures.push(RemoteFailure::from_step_error(step, &err));

            let class = err.retry_class();
            if class == RetryClass::Never || attempt >= self.policy.max_attempts {
                return (Err(err), trace);
            }

            if class == RetryClass::SameProxy && same_proxy_left > 0 {
                same_proxy_left -= 1;
                tokio::time::sleep(self.policy.backoff_base).await;
                continue;
            }

            // Rotation path: blocked identities cool down; a transient
            // failure that exhausted its same-proxy budget rotates too,
            // but the identity itself is not suspect.
            if matches!(err, StepError::Blocked { .. }) {
                self.pool.mark_rate_limited(&current.addr, self.policy.proxy_cooldown);
            }
            current = match self.pool.acquire(preferred) {
                Some(p) => p,
                None => {
                    trace
                        .failures
                        .push(RemoteFailure::from_step_error(step, &StepError::ProxyExhausted));
                    return (Err(StepError::ProxyExhausted), trace);
                }
            };
            same_proxy_left = self.policy.transient_retries;
            let delay = self.policy.backoff_delay(rotations);
            rotations += 1;
            tokio::time::sleep(delay).await;
        }
    }
}
