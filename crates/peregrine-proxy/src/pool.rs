use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use peregrine_core::types::{ProxyClass, ProxyIdentity};

/// Pick the least-recently-used eligible identity, optionally narrowed
/// to one class. Never-used identities sort first (`None < Some`).
fn pick_index(
    entries: &[ProxyIdentity],
    now: DateTime<Utc>,
    class: Option<ProxyClass>,
) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, p)| p.enabled)
        .filter(|(_, p)| p.rate_limited_until.map_or(true, |until| until <= now))
        .filter(|(_, p)| class.map_or(true, |c| p.class == c))
        .min_by_key(|(_, p)| p.last_used)
        .map(|(i, _)| i)
}

/// In-memory pool of egress identities.
///
/// Loaded from the store at startup; mutated only through the pool for
/// the life of the process.
pub struct ProxyPool {
    entries: Mutex<Vec<ProxyIdentity>>,
}

impl ProxyPool {
    pub fn new(identities: Vec<ProxyIdentity>) -> Self {
        Self {
            entries: Mutex::new(identities),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand out a usable identity, or `None` when every identity is
    /// disabled or cooling down — the caller treats that as "cannot
    /// attempt now", not as fatal.
    ///
    /// Among eligible identities the requested class wins, falling back
    /// to any class, tie-broken least-recently-used. The selection also
    /// stamps `last_used` so a concurrent `acquire` cannot return the
    /// same identity.
    pub fn acquire(&self, preferred: Option<ProxyClass>) -> Option<ProxyIdentity> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();

        let idx = preferred
            .and_then(|c| pick_index(&entries, now, Some(c)))
            .or_else(|| pick_index(&entries, now, None));

        match idx {
            Some(i) => {
                entries[i].last_used = Some(now);
                debug!(addr = %entries[i].addr, class = %entries[i].class, "proxy acquired");
                Some(entries[i].clone())
            }
            None => {
                warn!("proxy pool exhausted — no eligible identity");
                None
            }
        }
    }

    /// The platform blocked this identity: ineligible until the cooldown
    /// elapses. Stays enabled — blocks are temporary.
    pub fn mark_rate_limited(&self, addr: &str, cooldown: std::time::Duration) {
        let until = Utc::now() + Duration::from_std(cooldown).unwrap_or(Duration::seconds(60));
        let mut entries = self.entries.lock().unwrap();
        if let Some(p) = entries.iter_mut().find(|p| p.addr == addr) {
            p.rate_limited_until = Some(until);
            debug!(%addr, until = %until, "proxy rate limited");
        }
    }

    /// Stamp `last_used` unconditionally after every attempt, success or
    /// failure, so rotation stays fair.
    pub fn mark_used(&self, addr: &str) {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        if let Some(p) = entries.iter_mut().find(|p| p.addr == addr) {
            p.last_used = Some(now);
        }
    }

    /// Current state of every identity, for operator logging.
    pub fn snapshot(&self) -> Vec<ProxyIdentity> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(addr: &str, class: ProxyClass) -> ProxyIdentity {
        ProxyIdentity {
            addr: addr.to_string(),
            class,
            enabled: true,
            last_used: None,
            rate_limited_until: None,
        }
    }

    #[test]
    fn empty_pool_is_exhausted() {
        let pool = ProxyPool::new(vec![]);
        assert!(pool.acquire(None).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn preferred_class_wins_over_lru() {
        let pool = ProxyPool::new(vec![
            identity("dc1", ProxyClass::Datacenter),
            identity("res1", ProxyClass::Residential),
        ]);
        let got = pool.acquire(Some(ProxyClass::Residential)).unwrap();
        assert_eq!(got.addr, "res1");
    }

    #[test]
    fn falls_back_to_any_class_when_preferred_unavailable() {
        let pool = ProxyPool::new(vec![identity("dc1", ProxyClass::Datacenter)]);
        let got = pool.acquire(Some(ProxyClass::Residential)).unwrap();
        assert_eq!(got.addr, "dc1");
    }

    #[test]
    fn acquire_rotates_through_identities() {
        let pool = ProxyPool::new(vec![
            identity("p1", ProxyClass::Datacenter),
            identity("p2", ProxyClass::Datacenter),
            identity("p3", ProxyClass::Datacenter),
        ]);
        // Selection marks last_used, so three acquires visit all three.
        let mut seen: Vec<String> = (0..3)
            .map(|_| pool.acquire(None).unwrap().addr)
            .collect();
        seen.sort();
        assert_eq!(seen, vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn rate_limited_identity_is_skipped_until_cooldown_elapses() {
        let pool = ProxyPool::new(vec![
            identity("p1", ProxyClass::Datacenter),
            identity("p2", ProxyClass::Datacenter),
        ]);
        pool.mark_rate_limited("p1", std::time::Duration::from_secs(300));

        // p1 is cooling down: every acquire lands on p2.
        for _ in 0..3 {
            assert_eq!(pool.acquire(None).unwrap().addr, "p2");
        }
    }

    #[test]
    fn expired_cooldown_restores_eligibility() {
        let mut p1 = identity("p1", ProxyClass::Datacenter);
        p1.rate_limited_until = Some(Utc::now() - Duration::seconds(10));
        // p2 used just now, p1 never — p1 wins once its cooldown is past.
        let mut p2 = identity("p2", ProxyClass::Datacenter);
        p2.last_used = Some(Utc::now());
        let pool = ProxyPool::new(vec![p1, p2]);

        assert_eq!(pool.acquire(None).unwrap().addr, "p1");
    }

    #[test]
    fn all_identities_cooling_down_means_exhausted() {
        let pool = ProxyPool::new(vec![identity("p1", ProxyClass::Datacenter)]);
        pool.mark_rate_limited("p1", std::time::Duration::from_secs(300));
        assert!(pool.acquire(None).is_none());
    }

    #[test]
    fn disabled_identities_are_never_selected() {
        let mut p = identity("p1", ProxyClass::Datacenter);
        p.enabled = false;
        let pool = ProxyPool::new(vec![p]);
        assert!(pool.acquire(None).is_none());
    }

    #[test]
    fn mark_used_pushes_identity_to_the_back_of_rotation() {
        let pool = ProxyPool::new(vec![
            identity("p1", ProxyClass::Datacenter),
            identity("p2", ProxyClass::Datacenter),
        ]);
        let first = pool.acquire(None).unwrap().addr;
        let second = pool.acquire(None).unwrap().addr;
        assert_ne!(first, second);

        // Re-stamp `first` as used again: next acquire picks `second`'s
        // identity, which is now the least recently used.
        pool.mark_used(&first);
        assert_eq!(pool.acquire(None).unwrap().addr, second);
    }
}
