use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use peregrine_core::types::ClaimKey;

/// Process-wide exclusivity map: ClaimKey → owning subscriber id.
///
/// The sole admission-control mechanism preventing redundant network
/// load and duplicate real-world bookings for the same slot. Created
/// once at process start and injected wherever it's needed; cleared at
/// the end of each release event's processing window.
///
/// One mutex, one operation granularity — no nested locks anywhere.
#[derive(Default)]
pub struct ClaimTable {
    claims: Mutex<HashMap<ClaimKey, String>>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert the mapping if absent. `false` means another
    /// attempt already owns the slot — a normal control-flow signal,
    /// not an error.
    pub fn try_claim(&self, key: &ClaimKey, subscriber_id: &str) -> bool {
        let mut claims = self.claims.lock().unwrap();
        if claims.contains_key(key) {
            return false;
        }
        claims.insert(key.clone(), subscriber_id.to_string());
        debug!(venue_id = %key.venue_id, date = %key.date, minutes = key.minutes,
               subscriber_id, "slot claimed");
        true
    }

    /// Remove the mapping only if currently owned by `subscriber_id`.
    /// A straggler can never release another attempt's claim.
    pub fn release(&self, key: &ClaimKey, subscriber_id: &str) {
        let mut claims = self.claims.lock().unwrap();
        if claims.get(key).map(String::as_str) == Some(subscriber_id) {
            claims.remove(key);
            debug!(venue_id = %key.venue_id, date = %key.date, minutes = key.minutes,
                   subscriber_id, "claim released");
        }
    }

    /// Clear the table at the end of a release event's processing window.
    pub fn release_all(&self) {
        self.claims.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.claims.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn key(minutes: u16) -> ClaimKey {
        ClaimKey {
            venue_id: "v1".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 8, 21).unwrap(),
            minutes,
        }
    }

    #[test]
    fn first_claim_wins_second_loses() {
        let table = ClaimTable::new();
        assert!(table.try_claim(&key(1170), "alice"));
        assert!(!table.try_claim(&key(1170), "bob"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_keys_do_not_conflict() {
        let table = ClaimTable::new();
        assert!(table.try_claim(&key(1170), "alice"));
        assert!(table.try_claim(&key(1185), "bob"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn release_is_owner_scoped() {
        let table = ClaimTable::new();
        assert!(table.try_claim(&key(1170), "alice"));

        // A non-owner release leaves the claim intact.
        table.release(&key(1170), "bob");
        assert!(!table.try_claim(&key(1170), "bob"));

        // The owner's release frees it for anyone.
        table.release(&key(1170), "alice");
        assert!(table.try_claim(&key(1170), "bob"));
    }

    #[test]
    fn release_all_clears_the_table() {
        let table = ClaimTable::new();
        table.try_claim(&key(1170), "alice");
        table.try_claim(&key(1185), "bob");
        table.release_all();
        assert!(table.is_empty());
        assert!(table.try_claim(&key(1170), "carol"));
    }

    #[test]
    fn concurrent_claims_admit_exactly_one() {
        let table = Arc::new(ClaimTable::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                table.try_claim(&key(1170), &format!("sub-{i}"))
            }));
        }
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
        assert_eq!(table.len(), 1);
    }
}
