use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::models::Listing;
use crate::providers::Provider;

/// Fetch detail-page timestamps for candidate listings through a bounded
/// worker pool.
///
/// Only called with candidates that are not yet in the seen set; listings
/// already carrying a timestamp are skipped. A failed fetch leaves
/// `posted_ts` unset so the listing falls back to the grace-window rule.
/// Returns the number of timestamps fetched.
pub async fn enrich_candidates(
    provider: &dyn Provider,
    candidates: &mut [Listing],
    concurrency: usize,
) -> usize {
    if !provider.supports_detail_timestamps() {
        return 0;
    }

    let targets: Vec<(usize, Listing)> = candidates
        .iter()
        .enumerate()
        .filter(|(_, listing)| listing.posted_ts.is_none())
        .map(|(idx, listing)| (idx, listing.clone()))
        .collect();

    if targets.is_empty() {
        return 0;
    }

    debug!(
        platform = provider.platform(),
        candidates = targets.len(),
        concurrency,
        "enriching candidates with detail timestamps"
    );

    let results: Vec<(usize, Option<chrono::DateTime<chrono::Utc>>)> = stream::iter(targets)
        .map(|(idx, listing)| async move {
            match provider.fetch_detail_timestamp(&listing).await {
                Ok(ts) => (idx, ts),
                Err(err) => {
                    warn!(
                        platform = provider.platform(),
                        url = %listing.url,
                        error = %err,
                        "detail fetch failed"
                    );
                    (idx, None)
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut fetched = 0;
    for (idx, ts) in results {
        if let Some(ts) = ts {
            candidates[idx].posted_ts = Some(ts);
            fetched += 1;
        }
    }
    fetched
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::providers::{CrawledPage, ProviderError};

    struct DetailProvider {
        timestamps: HashMap<String, DateTime<Utc>>,
        failing_ids: Vec<String>,
        in_flight: AtomicUsize,
        max_in_flight: Mutex<usize>,
        supports: bool,
    }

    #[async_trait]
    impl Provider for DetailProvider {
        fn platform(&self) -> &str {
            "militaria321.com"
        }

        async fn crawl_page(
            &self,
            _keyword: &str,
            _page_index: u32,
        ) -> Result<CrawledPage, ProviderError> {
            Ok(CrawledPage {
                listings: vec![],
                has_more: false,
                total_count: None,
            })
        }

        fn supports_detail_timestamps(&self) -> bool {
            self.supports
        }

        async fn fetch_detail_timestamp(
            &self,
            listing: &Listing,
        ) -> Result<Option<DateTime<Utc>>, ProviderError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            {
                let mut max = self.max_in_flight.lock().unwrap();
                *max = (*max).max(current);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_ids.contains(&listing.platform_id) {
                return Err(ProviderError::ParseFailure {
                    platform: "militaria321.com".to_string(),
                    page_index: 0,
                    message: "detail page unreadable".to_string(),
                });
            }
            Ok(self.timestamps.get(&listing.platform_id).copied())
        }

        fn is_throttled(&self) -> bool {
            false
        }
    }

    fn listing(id: &str) -> Listing {
        Listing {
            platform: "militaria321.com".to_string(),
            platform_id: id.to_string(),
            title: "Test".to_string(),
            url: format!("https://www.militaria321.com/auktion/{}/x", id),
            price: None,
            posted_ts: None,
            page_index: 1,
        }
    }

    #[tokio::test]
    async fn test_enrichment_fills_timestamps_and_tolerates_failures() {
        let ts = Utc.with_ymd_and_hms(2025, 7, 4, 11, 21, 0).unwrap();
        let mut timestamps = HashMap::new();
        timestamps.insert("1".to_string(), ts);
        timestamps.insert("3".to_string(), ts);

        let provider = DetailProvider {
            timestamps,
            failing_ids: vec!["2".to_string()],
            in_flight: AtomicUsize::new(0),
            max_in_flight: Mutex::new(0),
            supports: true,
        };

        let mut candidates = vec![listing("1"), listing("2"), listing("3")];
        let fetched = enrich_candidates(&provider, &mut candidates, 4).await;

        assert_eq!(fetched, 2);
        assert_eq!(candidates[0].posted_ts, Some(ts));
        // The failing listing proceeds without a timestamp
        assert_eq!(candidates[1].posted_ts, None);
        assert_eq!(candidates[2].posted_ts, Some(ts));
    }

    #[tokio::test]
    async fn test_enrichment_respects_concurrency_cap() {
        let provider = DetailProvider {
            timestamps: HashMap::new(),
            failing_ids: vec![],
            in_flight: AtomicUsize::new(0),
            max_in_flight: Mutex::new(0),
            supports: true,
        };

        let mut candidates: Vec<Listing> =
            (0..12).map(|i| listing(&i.to_string())).collect();
        enrich_candidates(&provider, &mut candidates, 2).await;

        assert!(*provider.max_in_flight.lock().unwrap() <= 2);
    }

    #[tokio::test]
    async fn test_enrichment_skips_unsupported_provider() {
        let provider = DetailProvider {
            timestamps: HashMap::new(),
            failing_ids: vec![],
            in_flight: AtomicUsize::new(0),
            max_in_flight: Mutex::new(0),
            supports: false,
        };

        let mut candidates = vec![listing("1")];
        let fetched = enrich_candidates(&provider, &mut candidates, 4).await;
        assert_eq!(fetched, 0);
        assert_eq!(candidates[0].posted_ts, None);
    }

    #[tokio::test]
    async fn test_enrichment_skips_already_timestamped() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let provider = DetailProvider {
            timestamps: HashMap::new(),
            failing_ids: vec![],
            in_flight: AtomicUsize::new(0),
            max_in_flight: Mutex::new(0),
            supports: true,
        };

        let mut candidates = vec![listing("1")];
        candidates[0].posted_ts = Some(ts);
        let fetched = enrich_candidates(&provider, &mut candidates, 4).await;

        assert_eq!(fetched, 0);
        assert_eq!(candidates[0].posted_ts, Some(ts));
    }
}
