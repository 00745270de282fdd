use chrono::Utc;
use tracing::{info, warn};

use crate::config::CooldownConfig;
use crate::models::{BaselineStatus, CooldownSeverity, ProviderState, Subscription};
use crate::poller::orchestrator::CrawlOrchestrator;
use crate::providers::Provider;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineOutcome {
    pub status: BaselineStatus,
    pub pages_scanned: u32,
    pub items_collected: u32,
    pub keys_added: usize,
}

/// Establishes the seen-key set for a new (subscription, provider) pair.
///
/// Every observed key is absorbed unconditionally and no notification is
/// ever emitted here: baseline defines "already known", it does not detect
/// novelty. An interrupted run commits the keys collected so far and
/// resumes at the page after the last one scanned.
pub struct BaselineBuilder<'a> {
    orchestrator: &'a CrawlOrchestrator,
    store: &'a dyn Store,
    cooldown: CooldownConfig,
}

impl<'a> BaselineBuilder<'a> {
    pub fn new(
        orchestrator: &'a CrawlOrchestrator,
        store: &'a dyn Store,
        cooldown: CooldownConfig,
    ) -> Self {
        Self {
            orchestrator,
            store,
            cooldown,
        }
    }

    /// Run (or resume) the baseline crawl for one provider. Returns `None`
    /// when another run already holds the pair (status `running`).
    pub async fn run(
        &self,
        subscription: &mut Subscription,
        provider: &dyn Provider,
    ) -> crate::Result<Option<BaselineOutcome>> {
        let platform = provider.platform().to_string();
        let subscription_id = subscription.id.clone();
        let now = Utc::now();

        // Claim the run; resuming a partial baseline keeps its keys and
        // continues behind the last scanned page.
        let resume_page = {
            let state = state_mut(subscription, &platform)?;
            match state.baseline_status {
                BaselineStatus::Running => {
                    warn!(
                        subscription_id = %subscription_id,
                        platform = %platform,
                        "baseline already running, skipping"
                    );
                    return Ok(None);
                }
                BaselineStatus::Partial => state.baseline_pages_scanned + 1,
                _ => {
                    state.baseline_pages_scanned = 0;
                    state.baseline_items_collected = 0;
                    1
                }
            }
        };

        {
            let state = state_mut(subscription, &platform)?;
            state.baseline_status = BaselineStatus::Running;
            state.baseline_started_ts = Some(now);
        }
        subscription.updated_at = now;
        self.store.update_subscription(subscription).await?;

        info!(
            subscription_id = %subscription_id,
            platform = %platform,
            resume_page,
            keyword = %subscription.normalized_keyword,
            "baseline crawl starting"
        );

        let snapshot = state_mut(subscription, &platform)?.clone();
        let scan = self
            .orchestrator
            .scan(provider, &subscription.keyword, &snapshot, resume_page)
            .await;

        let now = Utc::now();
        let outcome = {
            let state = state_mut(subscription, &platform)?;

            let mut keys_added = 0;
            for listing in &scan.listings {
                if state.seen_keys.insert(listing.canonical_key()) {
                    keys_added += 1;
                }
            }

            state.baseline_pages_scanned += scan.pages_scanned;
            state.baseline_items_collected += scan.listings.len() as u32;
            state.error_count += scan.page_errors;
            state.total_pages_estimate = scan.total_pages_estimate;

            state.baseline_status = if scan.reached_end && scan.throttled.is_none() {
                state.baseline_completed_ts = Some(now);
                BaselineStatus::Complete
            } else if state.baseline_pages_scanned == 0 {
                // Nothing could be fetched at all: retry from scratch next poll
                BaselineStatus::Error
            } else {
                BaselineStatus::Partial
            };

            if let Some(severity) = scan.throttled {
                let until = now + self.cooldown_for(severity);
                state.set_cooldown(until, severity);
            }

            BaselineOutcome {
                status: state.baseline_status,
                pages_scanned: state.baseline_pages_scanned,
                items_collected: state.baseline_items_collected,
                keys_added,
            }
        };

        subscription.updated_at = now;
        self.store.update_subscription(subscription).await?;

        info!(
            subscription_id = %subscription_id,
            platform = %platform,
            status = ?outcome.status,
            pages_scanned = outcome.pages_scanned,
            items_collected = outcome.items_collected,
            keys_added = outcome.keys_added,
            "baseline crawl finished"
        );
        metrics::counter!("argus_baseline_runs_total").increment(1);

        Ok(Some(outcome))
    }

    fn cooldown_for(&self, severity: CooldownSeverity) -> chrono::Duration {
        match severity {
            CooldownSeverity::RateLimited => {
                chrono::Duration::minutes(self.cooldown.rate_limited_minutes)
            }
            CooldownSeverity::Blocked => chrono::Duration::minutes(self.cooldown.blocked_minutes),
        }
    }
}

fn state_mut<'s>(
    subscription: &'s mut Subscription,
    platform: &str,
) -> crate::Result<&'s mut ProviderState> {
    subscription
        .provider_states
        .get_mut(platform)
        .ok_or_else(|| {
            crate::AppError::Internal(format!("missing provider state for {}", platform))
        })
}
