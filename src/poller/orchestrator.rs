use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use crate::config::{CrawlerConfig, PollerConfig};
use crate::models::{CooldownSeverity, Listing, PollStrategy, ProviderState};
use crate::providers::{CrawledPage, Provider, ProviderError};

/// Result of one per-cycle scan of a single provider.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Listings in page order, then item order within each page.
    pub listings: Vec<Listing>,
    pub pages_scanned: u32,
    /// Updated page-count estimate, when the scan learned one.
    pub total_pages_estimate: Option<u32>,
    /// Set when the provider signalled throttling; the scan stopped there.
    pub throttled: Option<CooldownSeverity>,
    pub page_errors: u32,
    /// True only when the provider reported the end of its result set.
    pub reached_end: bool,
    /// Rotating mode: cursor position for the next cycle.
    pub next_cursor: Option<u32>,
}

/// Drives a provider through one poll cycle's pages: pagination strategy,
/// adaptive inter-request delay, end-of-results detection and throttling
/// signals.
pub struct CrawlOrchestrator {
    crawler: CrawlerConfig,
    poller: PollerConfig,
}

impl CrawlOrchestrator {
    pub fn new(crawler: CrawlerConfig, poller: PollerConfig) -> Self {
        Self { crawler, poller }
    }

    pub async fn scan(
        &self,
        provider: &dyn Provider,
        keyword: &str,
        state: &ProviderState,
        start_page: u32,
    ) -> ScanOutcome {
        // A provider still latched from a recent throttling response (for
        // any subscription) is not crawled again; the latch expires on its
        // own, the per-state cooldown is handled by the caller.
        if provider.is_throttled() {
            debug!(
                platform = provider.platform(),
                "provider reports active throttling, deferring scan"
            );
            return ScanOutcome {
                throttled: Some(CooldownSeverity::RateLimited),
                total_pages_estimate: state.total_pages_estimate,
                ..ScanOutcome::default()
            };
        }

        match state.strategy {
            PollStrategy::Exhaustive => self.scan_exhaustive(provider, keyword, state, start_page).await,
            PollStrategy::RotatingWindow => self.scan_rotating(provider, keyword, state).await,
        }
    }

    /// Scan pages sequentially until the provider reports no more pages or
    /// the per-cycle ceiling is hit. Never stops early beyond that: result
    /// ordering on the watched sites is unrelated to posting time, so any
    /// skipped page can permanently hide a new item.
    async fn scan_exhaustive(
        &self,
        provider: &dyn Provider,
        keyword: &str,
        state: &ProviderState,
        start_page: u32,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let mut consecutive_failures = 0u32;
        let mut page = start_page.max(1);
        let mut attempts = 0u32;

        while attempts < self.poller.max_pages_per_cycle {
            attempts += 1;

            match self.fetch_page(provider, keyword, page).await {
                Ok(crawled) => {
                    consecutive_failures = 0;
                    outcome.pages_scanned += 1;
                    let has_more = crawled.has_more;
                    self.collect_page(&mut outcome, crawled, page);

                    if !has_more {
                        outcome.reached_end = true;
                        outcome.total_pages_estimate = Some(page);
                        break;
                    }
                }
                Err(err) => {
                    if let Some(severity) = err.cooldown_severity() {
                        warn!(
                            platform = provider.platform(),
                            page,
                            error = %err,
                            "throttling signal, stopping scan"
                        );
                        outcome.throttled = Some(severity);
                        break;
                    }

                    outcome.page_errors += 1;
                    match err {
                        ProviderError::ParseFailure { .. } => {
                            // Structure drift on one page: treat as empty, keep going
                            warn!(
                                platform = provider.platform(),
                                page,
                                error = %err,
                                "page parse failed, treating as empty"
                            );
                        }
                        _ => {
                            consecutive_failures += 1;
                            warn!(
                                platform = provider.platform(),
                                page,
                                error = %err,
                                consecutive_failures,
                                "page fetch failed, skipping page"
                            );
                            if consecutive_failures >= self.poller.error_budget {
                                break;
                            }
                        }
                    }
                }
            }

            page += 1;
            tokio::time::sleep(self.page_delay(state.total_pages_estimate, outcome.pages_scanned))
                .await;
        }

        if outcome.total_pages_estimate.is_none() {
            outcome.total_pages_estimate = state.total_pages_estimate;
        }

        debug!(
            platform = provider.platform(),
            pages_scanned = outcome.pages_scanned,
            items = outcome.listings.len(),
            reached_end = outcome.reached_end,
            page_errors = outcome.page_errors,
            "exhaustive scan finished"
        );

        outcome
    }

    /// Rescan a fixed set of primary pages plus a cursor-advancing window.
    /// Stops early after a run of pages contributing zero unseen candidates;
    /// the cursor wraps modulo the last known page-count estimate.
    async fn scan_rotating(
        &self,
        provider: &dyn Provider,
        keyword: &str,
        state: &ProviderState,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let plan = self.rotating_plan(state);
        let mut zero_unseen_streak = 0u32;
        let mut consecutive_failures = 0u32;

        for (i, page) in plan.iter().copied().enumerate() {
            match self.fetch_page(provider, keyword, page).await {
                Ok(crawled) => {
                    consecutive_failures = 0;
                    outcome.pages_scanned += 1;
                    let has_more = crawled.has_more;

                    let unseen = crawled
                        .listings
                        .iter()
                        .filter(|l| !state.seen_keys.contains(&l.canonical_key()))
                        .count();
                    self.collect_page(&mut outcome, crawled, page);

                    if !has_more {
                        outcome.total_pages_estimate = Some(page);
                        break;
                    }

                    if unseen == 0 {
                        zero_unseen_streak += 1;
                        if zero_unseen_streak >= self.poller.zero_unseen_page_stop {
                            debug!(
                                platform = provider.platform(),
                                page, "no unseen candidates, stopping rotating scan early"
                            );
                            break;
                        }
                    } else {
                        zero_unseen_streak = 0;
                    }
                }
                Err(err) => {
                    if let Some(severity) = err.cooldown_severity() {
                        outcome.throttled = Some(severity);
                        break;
                    }
                    outcome.page_errors += 1;
                    if !matches!(err, ProviderError::ParseFailure { .. }) {
                        consecutive_failures += 1;
                        if consecutive_failures >= self.poller.error_budget {
                            break;
                        }
                    }
                }
            }

            if i + 1 < plan.len() {
                tokio::time::sleep(
                    self.page_delay(state.total_pages_estimate, outcome.pages_scanned),
                )
                .await;
            }
        }

        if outcome.total_pages_estimate.is_none() {
            outcome.total_pages_estimate = state.total_pages_estimate;
        }
        outcome.next_cursor = Some(self.advance_cursor(state, outcome.total_pages_estimate));

        outcome
    }

    fn rotating_plan(&self, state: &ProviderState) -> Vec<u32> {
        let mut pages: Vec<u32> = (1..=self.poller.primary_pages).collect();
        let window_start = state.poll_cursor_page.max(1);
        let estimate = state
            .total_pages_estimate
            .unwrap_or(window_start + self.poller.rotating_window)
            .max(1);

        for offset in 0..self.poller.rotating_window {
            let mut page = window_start + offset;
            if page > estimate {
                page = ((page - 1) % estimate) + 1;
            }
            if !pages.contains(&page) {
                pages.push(page);
            }
        }

        pages
    }

    fn advance_cursor(&self, state: &ProviderState, estimate: Option<u32>) -> u32 {
        let next = state.poll_cursor_page.max(1) + self.poller.rotating_window;
        match estimate {
            Some(total) if next > total => 1,
            _ => next,
        }
    }

    fn collect_page(&self, outcome: &mut ScanOutcome, crawled: CrawledPage, page: u32) {
        let mut listings = crawled.listings;
        for listing in &mut listings {
            listing.page_index = page;
        }
        outcome.listings.extend(listings);
    }

    /// Large result sets get shorter burst pacing; everything else the
    /// normal delay.
    fn page_delay(&self, estimate: Option<u32>, pages_scanned: u32) -> Duration {
        let effective = estimate.unwrap_or(0).max(pages_scanned);
        if effective >= self.crawler.burst_threshold_pages {
            Duration::from_millis(self.crawler.burst_page_delay_ms)
        } else {
            Duration::from_millis(self.crawler.page_delay_ms)
        }
    }

    /// One page fetch with bounded retries on transient network failures.
    /// Throttling and parse errors pass through untouched.
    async fn fetch_page(
        &self,
        provider: &dyn Provider,
        keyword: &str,
        page: u32,
    ) -> Result<CrawledPage, ProviderError> {
        let strategy = FixedInterval::from_millis(self.crawler.retry_delay_ms)
            .take(self.crawler.retry_attempts as usize);

        RetryIf::spawn(
            strategy,
            || provider.crawl_page(keyword, page),
            |err: &ProviderError| err.is_retryable(),
        )
        .await
    }
}
