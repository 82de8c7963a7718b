use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use peregrine_client::StepError;
use peregrine_core::types::SlotCandidate;

type SlotList = Arc<Vec<SlotCandidate>>;

/// Per-release-event search cache, shared read-only across subscriber
/// tasks once populated.
///
/// Single-flight: when two tasks race on the same (date, party size),
/// one performs the network call and the other awaits the same cell. A
/// failed population is not cached — the next caller retries.
#[derive(Default)]
pub struct SearchCache {
    entries: DashMap<(NaiveDate, u32), Arc<OnceCell<SlotList>>>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut>(
        &self,
        date: NaiveDate,
        party_size: u32,
        fetch: F,
    ) -> Result<SlotList, StepError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<SlotCandidate>, StepError>>,
    {
        // Clone the cell out before awaiting — holding a DashMap guard
        // across a suspension point would deadlock the other tasks.
        let cell = {
            self.entries
                .entry((date, party_size))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value()
                .clone()
        };
        cell.get_or_try_init(|| async { fetch().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn slot(time: &str) -> SlotCandidate {
        SlotCandidate {
            venue_id: "v1".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 8, 21).unwrap(),
            time: time.to_string(),
            config_id: "cfg".to_string(),
            table_type: None,
        }
    }

    #[tokio::test]
    async fn second_caller_reuses_the_first_result() {
        let cache = SearchCache::new();
        let calls = AtomicU32::new(0);
        let date = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();

        for _ in 0..3 {
            let got = cache
                .get_or_fetch(date, 2, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(vec![slot("19:30")]) }
                })
                .await
                .unwrap();
            assert_eq!(got.len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_party_sizes_fetch_separately() {
        let cache = SearchCache::new();
        let calls = AtomicU32::new(0);
        let date = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();

        for party in [2u32, 4] {
            cache
                .get_or_fetch(date, party, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(vec![]) }
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn failed_population_is_retried_by_the_next_caller() {
        let cache = SearchCache::new();
        let calls = AtomicU32::new(0);
        let date = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();

        let first = cache
            .get_or_fetch(date, 2, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StepError::Transient("boom".to_string())) }
            })
            .await;
        assert!(first.is_err());

        let second = cache
            .get_or_fetch(date, 2, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(vec![slot("19:30")]) }
            })
            .await;
        assert_eq!(second.unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn racing_callers_share_one_flight() {
        let cache = Arc::new(SearchCache::new());
        let calls = Arc::new(AtomicU32::new(0));
        let date = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(date, 2, || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            // Linger so the other tasks pile onto this flight.
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                            Ok(vec![slot("19:30")])
                        }
                    })
                    .await
                    .unwrap()
                    .len()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
