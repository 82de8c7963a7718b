use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (peregrine.toml + PEREGRINE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeregrineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub booking: BookingConfig,
}

impl Default for PeregrineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            platform: PlatformConfig::default(),
            booking: BookingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Remote booking platform endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Platform-wide client key sent with every request. Subscriber
    /// credentials ride on top of this as opaque bearer tokens.
    #[serde(default)]
    pub api_key: String,
    /// Hard bound on every network step; exceeding it is classified as
    /// a transient failure.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Retry, backoff, and claim policy for booking attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Total tries per network step across proxy rotations.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Same-proxy retries for transient network failures before the
    /// failure escalates to rotation.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Cooldown applied to an identity the platform blocked.
    #[serde(default = "default_proxy_cooldown_secs")]
    pub proxy_cooldown_secs: u64,
    /// Whether a claim is handed back after a confirm-step failure.
    /// Off by default: the platform may have partially processed the
    /// booking, so the slot stays claimed rather than letting another
    /// subscriber burn attempts on it.
    #[serde(default)]
    pub release_claim_on_confirm_failure: bool,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            transient_retries: default_transient_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            proxy_cooldown_secs: default_proxy_cooldown_secs(),
            release_claim_on_confirm_failure: false,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.peregrine/peregrine.db", home)
}
fn default_base_url() -> String {
    "https://api.resy.com".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    5
}
fn default_transient_retries() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    8_000
}
fn default_proxy_cooldown_secs() -> u64 {
    120
}

impl PeregrineConfig {
    /// Load config from a TOML file with PEREGRINE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.peregrine/peregrine.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PeregrineConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PEREGRINE_").split("_"))
            .extract()
            .map_err(|e| crate::error::PeregrineError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.peregrine/peregrine.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PeregrineConfig::default();
        assert!(cfg.booking.max_attempts > 0);
        assert!(cfg.booking.backoff_base_ms <= cfg.booking.backoff_cap_ms);
        assert!(!cfg.booking.release_claim_on_confirm_failure);
        assert!(cfg.database.path.ends_with("peregrine.db"));
    }
}
