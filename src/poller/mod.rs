use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, CooldownConfig, PollerConfig};
use crate::models::{BaselineStatus, CooldownSeverity, Listing, PollStrategy, Subscription};
use crate::notify::{NotificationDispatcher, Notifier};
use crate::providers::Provider;
use crate::store::Store;

pub mod baseline;
pub mod enrich;
pub mod gate;
pub mod orchestrator;

pub use baseline::{BaselineBuilder, BaselineOutcome};
pub use gate::{Decision, NewnessGate};
pub use orchestrator::{CrawlOrchestrator, ScanOutcome};

/// Per-provider counters for one poll cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderReport {
    pub platform: String,
    pub pages_scanned: u32,
    pub items_found: usize,
    pub unseen_candidates: usize,
    pub pushed: usize,
    pub absorbed: usize,
    pub duplicates: usize,
    pub suppressed: usize,
    pub page_errors: u32,
    pub cooldown_active: bool,
    pub baseline: Option<BaselineStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollReport {
    pub subscription_id: String,
    pub providers: Vec<ProviderReport>,
}

impl PollReport {
    pub fn total_pushed(&self) -> usize {
        self.providers.iter().map(|r| r.pushed).sum()
    }
}

/// Runs one poll cycle per subscription: baseline when needed, otherwise
/// scan, enrich, gate and dispatch, then persist seen keys and telemetry
/// atomically per subscription.
pub struct Poller {
    store: Arc<dyn Store>,
    providers: Vec<Arc<dyn Provider>>,
    dispatcher: NotificationDispatcher,
    orchestrator: CrawlOrchestrator,
    gate: NewnessGate,
    poller_config: PollerConfig,
    cooldown_config: CooldownConfig,
}

impl Poller {
    pub fn new(
        store: Arc<dyn Store>,
        providers: Vec<Arc<dyn Provider>>,
        notifier: Arc<dyn Notifier>,
        config: &AppConfig,
    ) -> Self {
        Self {
            dispatcher: NotificationDispatcher::new(Arc::clone(&store), notifier),
            orchestrator: CrawlOrchestrator::new(config.crawler.clone(), config.poller.clone()),
            gate: NewnessGate::new(config.poller.grace_minutes),
            poller_config: config.poller.clone(),
            cooldown_config: config.cooldown.clone(),
            store,
            providers,
        }
    }

    pub fn platforms(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.platform()).collect()
    }

    /// One full poll cycle for a subscription. Safe to call for ids that no
    /// longer exist; a deletion mid-cycle discards the cycle's writes.
    pub async fn poll_subscription(&self, subscription_id: &str) -> crate::Result<PollReport> {
        let mut report = PollReport {
            subscription_id: subscription_id.to_string(),
            providers: Vec::new(),
        };

        let Some(mut subscription) = self.store.get_subscription(subscription_id).await? else {
            debug!(subscription_id, "subscription gone, skipping poll");
            return Ok(report);
        };

        if !subscription.is_active || subscription.is_paused {
            debug!(subscription_id, "subscription inactive or paused, skipping poll");
            return Ok(report);
        }

        metrics::counter!("argus_polls_total").increment(1);

        let platforms = self.platforms();
        subscription.ensure_provider_states(&platforms, self.poller_config.default_strategy);

        let mut hard_failures = 0usize;
        let mut last_error = String::new();
        for provider in &self.providers {
            match self.poll_provider(&mut subscription, provider.as_ref()).await {
                Ok(provider_report) => report.providers.push(provider_report),
                Err(err) => {
                    warn!(
                        subscription_id,
                        platform = provider.platform(),
                        error = %err,
                        "provider poll failed"
                    );
                    hard_failures += 1;
                    last_error = err.to_string();
                    report.providers.push(ProviderReport {
                        platform: provider.platform().to_string(),
                        ..Default::default()
                    });
                }
            }
        }

        let now = Utc::now();
        let all_cooling = !report.providers.is_empty()
            && report.providers.iter().all(|r| r.cooldown_active);

        if hard_failures > 0 {
            subscription.record_failure(now, &last_error);
        } else if all_cooling {
            // Cooldown polls are no-ops: touch last_checked, not last_success
            subscription.last_checked = Some(now);
            subscription.updated_at = now;
        } else {
            subscription.record_success(now);
        }

        if !self.store.update_subscription(&subscription).await? {
            info!(subscription_id, "subscription deleted mid-poll, discarding state");
        }

        info!(
            subscription_id,
            keyword = %subscription.normalized_keyword,
            pushed = report.total_pushed(),
            providers = report.providers.len(),
            "poll cycle finished"
        );

        Ok(report)
    }

    async fn poll_provider(
        &self,
        subscription: &mut Subscription,
        provider: &dyn Provider,
    ) -> crate::Result<ProviderReport> {
        let platform = provider.platform().to_string();
        let subscription_id = subscription.id.clone();
        let now = Utc::now();
        let mut report = ProviderReport {
            platform: platform.clone(),
            ..Default::default()
        };

        {
            let state = state_mut(subscription, &platform)?;

            // Pre-canonical or emptied states are silently rebuilt
            if state.requires_rebuild() {
                info!(
                    subscription_id = %subscription_id,
                    platform = %platform,
                    "seen set missing or pre-canonical, rebuilding baseline"
                );
                state.reset_for_rebuild();
            }

            if state.strategy == PollStrategy::RotatingWindow
                && self.poller_config.default_strategy == PollStrategy::Exhaustive
            {
                info!(
                    subscription_id = %subscription_id,
                    platform = %platform,
                    "upgrading rotating-window subscription to exhaustive scanning"
                );
                state.strategy = PollStrategy::Exhaustive;
            }

            if state.is_cooling_down(now) {
                debug!(
                    subscription_id = %subscription_id,
                    platform = %platform,
                    until = ?state.cooldown_until,
                    "cooldown active, skipping provider"
                );
                report.cooldown_active = true;
                report.baseline = Some(state.baseline_status);
                return Ok(report);
            }
            if state.cooldown_until.is_some() {
                state.clear_cooldown();
            }
        }

        let status = state_mut(subscription, &platform)?.baseline_status;
        match status {
            BaselineStatus::Pending | BaselineStatus::Error | BaselineStatus::Partial => {
                let builder = BaselineBuilder::new(
                    &self.orchestrator,
                    self.store.as_ref(),
                    self.cooldown_config.clone(),
                );
                match builder.run(subscription, provider).await? {
                    Some(outcome) => {
                        report.baseline = Some(outcome.status);
                        report.pages_scanned = outcome.pages_scanned;
                        report.items_found = outcome.items_collected as usize;
                    }
                    None => report.baseline = Some(BaselineStatus::Running),
                }
                return Ok(report);
            }
            BaselineStatus::Running => {
                report.baseline = Some(BaselineStatus::Running);
                return Ok(report);
            }
            BaselineStatus::Complete => {
                report.baseline = Some(BaselineStatus::Complete);
            }
        }

        let snapshot = state_mut(subscription, &platform)?.clone();
        let scan = self
            .orchestrator
            .scan(provider, &subscription.keyword, &snapshot, 1)
            .await;

        report.pages_scanned = scan.pages_scanned;
        report.page_errors = scan.page_errors;
        report.items_found = scan.listings.len();
        metrics::counter!("argus_pages_fetched_total").increment(scan.pages_scanned as u64);

        // Candidates: first occurrence of each unseen key, checked before
        // enrichment so detail fetches are never spent on known listings
        let mut candidate_keys: HashSet<String> = HashSet::new();
        let mut candidates: Vec<Listing> = Vec::new();
        for listing in &scan.listings {
            let key = listing.canonical_key();
            if !snapshot.seen_keys.contains(&key) && candidate_keys.insert(key) {
                candidates.push(listing.clone());
            }
        }
        report.unseen_candidates = candidates.len();

        if !candidates.is_empty() {
            enrich::enrich_candidates(
                provider,
                &mut candidates,
                self.poller_config.detail_concurrency,
            )
            .await;
        }
        let enriched: HashMap<String, DateTime<Utc>> = candidates
            .iter()
            .filter_map(|l| l.posted_ts.map(|ts| (l.canonical_key(), ts)))
            .collect();

        // Gate in page order, then item order within each page
        let now = Utc::now();
        let mut pushed_this_cycle: HashSet<String> = HashSet::new();
        let mut new_keys: Vec<String> = Vec::new();

        for listing in &scan.listings {
            let mut listing = listing.clone();
            let key = listing.canonical_key();
            if listing.posted_ts.is_none() {
                if let Some(ts) = enriched.get(&key) {
                    listing.posted_ts = Some(*ts);
                }
            }

            let decision = self.gate.decide(
                &listing,
                &snapshot.seen_keys,
                &pushed_this_cycle,
                subscription.since_ts,
                now,
            );

            debug!(
                subscription_id = %subscription_id,
                platform = %platform,
                listing_key = %key,
                decision = decision.as_str(),
                posted_ts = ?listing.posted_ts,
                since_ts = %subscription.since_ts,
                "decision"
            );

            match decision {
                Decision::Push => {
                    pushed_this_cycle.insert(key.clone());
                    new_keys.push(key);
                    if self.dispatcher.dispatch(subscription, &listing).await? {
                        report.pushed += 1;
                    } else {
                        report.suppressed += 1;
                    }
                }
                Decision::TooOld => {
                    new_keys.push(key);
                    report.absorbed += 1;
                }
                Decision::AlreadySeen => {}
                Decision::Duplicate => {
                    report.duplicates += 1;
                }
            }
        }

        {
            let state = state_mut(subscription, &platform)?;
            for key in new_keys {
                state.seen_keys.insert(key);
            }
            if scan.total_pages_estimate.is_some() {
                state.total_pages_estimate = scan.total_pages_estimate;
            }
            if let Some(cursor) = scan.next_cursor {
                state.poll_cursor_page = cursor;
            }
            state.error_count += scan.page_errors;

            if let Some(severity) = scan.throttled {
                let until = now + self.cooldown_duration(severity);
                state.set_cooldown(until, severity);
                report.cooldown_active = true;
                metrics::counter!("argus_cooldowns_total").increment(1);
                warn!(
                    subscription_id = %subscription_id,
                    platform = %platform,
                    severity = ?severity,
                    until = %until,
                    "provider throttled, entering cooldown"
                );
            }
        }

        metrics::counter!("argus_pushes_total").increment(report.pushed as u64);
        metrics::counter!("argus_absorbed_total").increment(report.absorbed as u64);

        info!(
            subscription_id = %subscription_id,
            platform = %platform,
            keyword = %subscription.normalized_keyword,
            pages_scanned = report.pages_scanned,
            items_found = report.items_found,
            unseen_candidates = report.unseen_candidates,
            pushed = report.pushed,
            absorbed = report.absorbed,
            duplicates = report.duplicates,
            "poll summary"
        );

        Ok(report)
    }

    fn cooldown_duration(&self, severity: CooldownSeverity) -> chrono::Duration {
        match severity {
            CooldownSeverity::RateLimited => {
                chrono::Duration::minutes(self.cooldown_config.rate_limited_minutes)
            }
            CooldownSeverity::Blocked => {
                chrono::Duration::minutes(self.cooldown_config.blocked_minutes)
            }
        }
    }
}

fn state_mut<'s>(
    subscription: &'s mut Subscription,
    platform: &str,
) -> crate::Result<&'s mut crate::models::ProviderState> {
    subscription
        .provider_states
        .get_mut(platform)
        .ok_or_else(|| {
            crate::AppError::Internal(format!("missing provider state for {}", platform))
        })
}
