use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use argus_watcher::config::{
    AppConfig, CooldownConfig, CrawlerConfig, DatabaseConfig, MetricsConfig, NotificationsConfig,
    PollerConfig, WebhookConfig,
};
use argus_watcher::models::{Listing, PollStrategy, Subscription};
use argus_watcher::notify::Notifier;
use argus_watcher::providers::{CrawledPage, Provider, ProviderError};

#[derive(Clone, Copy)]
pub enum ThrottleMode {
    RateLimited,
    Blocked,
}

/// Scriptable provider serving fixed pages of listings. Pages can be
/// reseeded between polls to simulate new items appearing on the site.
pub struct MockProvider {
    platform: String,
    pages: Mutex<Vec<Vec<Listing>>>,
    detail_timestamps: Mutex<HashMap<String, DateTime<Utc>>>,
    supports_detail: bool,
    throttle: Mutex<Option<ThrottleMode>>,
    crawl_calls: AtomicU32,
}

impl MockProvider {
    pub fn new(platform: &str, supports_detail: bool) -> Self {
        Self {
            platform: platform.to_string(),
            pages: Mutex::new(Vec::new()),
            detail_timestamps: Mutex::new(HashMap::new()),
            supports_detail,
            throttle: Mutex::new(None),
            crawl_calls: AtomicU32::new(0),
        }
    }

    pub fn listing(platform: &str, id: u32, title: &str) -> Listing {
        Listing {
            platform: platform.to_string(),
            platform_id: id.to_string(),
            title: title.to_string(),
            url: format!("https://{}/auktion/{}/item", platform, id),
            price: None,
            posted_ts: None,
            page_index: 0,
        }
    }

    /// Seed `pages` result pages with `per_page` listings each, ids derived
    /// from page and position.
    pub fn seed_grid(&self, pages: usize, per_page: usize) {
        let grid = (1..=pages)
            .map(|page| {
                (0..per_page)
                    .map(|i| {
                        Self::listing(
                            &self.platform,
                            (page * 1000 + i) as u32,
                            &format!("Listing {}-{}", page, i),
                        )
                    })
                    .collect()
            })
            .collect();
        *self.pages.lock().unwrap() = grid;
    }

    /// Append a listing to a 1-based page.
    pub fn inject(&self, page: usize, listing: Listing) {
        let mut pages = self.pages.lock().unwrap();
        while pages.len() < page {
            pages.push(Vec::new());
        }
        pages[page - 1].push(listing);
    }

    pub fn set_detail_timestamp(&self, platform_id: u32, ts: DateTime<Utc>) {
        self.detail_timestamps
            .lock()
            .unwrap()
            .insert(platform_id.to_string(), ts);
    }

    pub fn set_throttle(&self, mode: Option<ThrottleMode>) {
        *self.throttle.lock().unwrap() = mode;
    }

    pub fn crawl_calls(&self) -> u32 {
        self.crawl_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn crawl_page(
        &self,
        _keyword: &str,
        page_index: u32,
    ) -> Result<CrawledPage, ProviderError> {
        self.crawl_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(mode) = *self.throttle.lock().unwrap() {
            return Err(match mode {
                ThrottleMode::RateLimited => ProviderError::RateLimited {
                    platform: self.platform.clone(),
                },
                ThrottleMode::Blocked => ProviderError::Blocked {
                    platform: self.platform.clone(),
                },
            });
        }

        let pages = self.pages.lock().unwrap();
        let listings = pages
            .get(page_index as usize - 1)
            .cloned()
            .unwrap_or_default();
        let has_more = (page_index as usize) < pages.len();

        Ok(CrawledPage {
            listings,
            has_more,
            total_count: None,
        })
    }

    fn supports_detail_timestamps(&self) -> bool {
        self.supports_detail
    }

    async fn fetch_detail_timestamp(
        &self,
        listing: &Listing,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        Ok(self
            .detail_timestamps
            .lock()
            .unwrap()
            .get(&listing.platform_id)
            .copied())
    }

    fn is_throttled(&self) -> bool {
        // Throttling is only discovered on request, like a site that starts
        // returning 429s without warning
        false
    }
}

/// Notifier recording every delivered (subscription, listing key) pair.
#[derive(Default)]
pub struct CollectingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_keys(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn notify(
        &self,
        subscription: &Subscription,
        listing: &Listing,
    ) -> argus_watcher::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((subscription.id.clone(), listing.canonical_key()));
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
        crawler: CrawlerConfig {
            request_timeout: 5,
            retry_attempts: 1,
            retry_delay_ms: 1,
            page_delay_ms: 1,
            burst_page_delay_ms: 1,
            burst_threshold_pages: 40,
            user_agent: "TestAgent/1.0".to_string(),
        },
        poller: PollerConfig {
            interval_seconds: 60,
            grace_minutes: 60,
            max_pages_per_cycle: 200,
            detail_concurrency: 4,
            primary_pages: 1,
            rotating_window: 5,
            zero_unseen_page_stop: 3,
            error_budget: 3,
            default_strategy: PollStrategy::Exhaustive,
            stale_success_warn_seconds: 180,
        },
        cooldown: CooldownConfig {
            rate_limited_minutes: 5,
            blocked_minutes: 60,
        },
        notifications: NotificationsConfig {
            webhook: WebhookConfig {
                url: None,
                username: "Argus Watcher".to_string(),
            },
        },
        metrics: MetricsConfig {
            enabled: false,
            port: 9001,
        },
    }
}
