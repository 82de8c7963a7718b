use thiserror::Error;

/// How the executor should respond to a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Terminal — retrying cannot change the outcome.
    Never,
    /// Rotate to a fresh egress identity, back off, retry.
    RotateProxy,
    /// Retry on the same identity a smaller fixed number of times,
    /// then escalate to rotation.
    SameProxy,
}

/// Classified outcome of one network call. The coordinator only ever
/// sees these variants; raw transport errors are converted at the
/// pipeline boundary.
#[derive(Debug, Error)]
pub enum StepError {
    /// The platform reports the slot already taken. Terminal for the
    /// whole attempt, and the claim is deliberately kept.
    #[error("slot sold out")]
    SoldOut,

    /// WAF block or rate limit (403/429).
    #[error("blocked by platform (HTTP {status})")]
    Blocked { status: u16, body: String },

    /// Timeout, connection failure, or a 5xx.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// The response could not be understood. Logged for tuning; never
    /// retried.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The subscriber's credential was rejected.
    #[error("unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    /// No eligible egress identity right now. The attempt is deferred
    /// or failed, never sent unproxied.
    #[error("proxy pool exhausted")]
    ProxyExhausted,
}

impl StepError {
    /// Short code string written to the error audit trail.
    pub fn code(&self) -> &'static str {
        match self {
            StepError::SoldOut => "SOLD_OUT",
            StepError::Blocked { .. } => "BLOCKED",
            StepError::Transient(_) => "TRANSIENT",
            StepError::Malformed(_) => "MALFORMED",
            StepError::Unauthorized { .. } => "UNAUTHORIZED",
            StepError::ProxyExhausted => "PROXY_EXHAUSTED",
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            StepError::SoldOut
            | StepError::Malformed(_)
            | StepError::Unauthorized { .. }
            | StepError::ProxyExhausted => RetryClass::Never,
            StepError::Blocked { .. } => RetryClass::RotateProxy,
            StepError::Transient(_) => RetryClass::SameProxy,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            StepError::Blocked { status, .. } | StepError::Unauthorized { status } => Some(*status),
            _ => None,
        }
    }

    /// Raw payload worth keeping for post-hoc tuning, when there is one.
    pub fn payload(&self) -> Option<&str> {
        match self {
            StepError::Blocked { body, .. } if !body.is_empty() => Some(body),
            _ => None,
        }
    }
}

/// One non-success remote response, recorded for every failure the
/// executor observes — including ones that a later retry recovered from.
#[derive(Debug, Clone)]
pub struct RemoteFailure {
    /// Which protocol step failed, e.g. "search".
    pub step: &'static str,
    pub http_status: Option<u16>,
    pub code: &'static str,
    pub message: String,
    pub payload: Option<String>,
}

impl RemoteFailure {
    pub fn from_step_error(step: &'static str, err: &StepError) -> Self {
        Self {
            step,
            http_status: err.http_status(),
            code: err.code(),
            message: err.to_string(),
            payload: err.payload().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sold_out_never_retries() {
        assert_eq!(StepError::SoldOut.retry_class(), RetryClass::Never);
    }

    #[test]
    fn unauthorized_never_retries() {
        let err = StepError::Unauthorized { status: 401 };
        assert_eq!(err.retry_class(), RetryClass::Never);
        assert_eq!(err.http_status(), Some(401));
    }

    #[test]
    fn malformed_never_retries() {
        assert_eq!(
            StepError::Malformed("not json".into()).retry_class(),
            RetryClass::Never
        );
    }

    #[test]
    fn blocked_rotates_proxy() {
        let err = StepError::Blocked {
            status: 429,
            body: "{\"status\":429}".into(),
        };
        assert_eq!(err.retry_class(), RetryClass::RotateProxy);
        assert_eq!(err.code(), "BLOCKED");
        assert_eq!(err.payload(), Some("{\"status\":429}"));
    }

    #[test]
    fn transient_retries_same_proxy() {
        assert_eq!(
            StepError::Transient("timeout".into()).retry_class(),
            RetryClass::SameProxy
        );
    }

    #[test]
    fn failure_record_carries_step_context() {
        let err = StepError::Blocked {
            status: 403,
            body: String::new(),
        };
        let failure = RemoteFailure::from_step_error("confirm", &err);
        assert_eq!(failure.step, "confirm");
        assert_eq!(failure.http_status, Some(403));
        assert_eq!(failure.code, "BLOCKED");
        assert!(failure.payload.is_none());
    }
}
