use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::config::PollerConfig;
use crate::models::{HealthReport, NewSubscription, Subscription};
use crate::poller::PollReport;
use crate::scheduler::PollScheduler;
use crate::store::Store;
use crate::utils::text::normalize_keyword;

/// Library API for the external command surface: create, delete,
/// force-recheck and health classification. All gating and crawl logic
/// stays in the poller; this layer only wires store and scheduler together.
pub struct SubscriptionManager {
    store: Arc<dyn Store>,
    scheduler: Arc<PollScheduler>,
    config: PollerConfig,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn Store>, scheduler: Arc<PollScheduler>, config: PollerConfig) -> Self {
        Self {
            store,
            scheduler,
            config,
        }
    }

    /// Create a subscription and start watching. The first scheduled or
    /// immediate poll runs the baseline crawl for every provider.
    pub async fn create(&self, user_id: &str, keyword: &str) -> crate::Result<Subscription> {
        let trimmed = keyword.trim();
        if trimmed.is_empty() {
            return Err(crate::AppError::Validation(
                "keyword must not be empty".to_string(),
            ));
        }

        let normalized = normalize_keyword(trimmed);
        if let Some(existing) = self.store.find_by_keyword(user_id, &normalized).await? {
            return Err(crate::AppError::Validation(format!(
                "subscription for '{}' already exists ({})",
                trimmed, existing.id
            )));
        }

        let subscription = Subscription::new(NewSubscription {
            user_id: user_id.to_string(),
            keyword: trimmed.to_string(),
        });

        self.store.insert_subscription(&subscription).await?;
        self.scheduler.schedule_subscription(&subscription).await?;

        info!(
            subscription_id = %subscription.id,
            user_id,
            keyword = %subscription.normalized_keyword,
            "subscription created"
        );

        // Seed the baseline right away instead of waiting a full interval
        let scheduler = Arc::clone(&self.scheduler);
        let subscription_id = subscription.id.clone();
        tokio::spawn(async move {
            match scheduler.run_now(&subscription_id).await {
                Ok(_) => {}
                Err(crate::AppError::AlreadyRunning { .. }) => {}
                Err(err) => {
                    warn!(subscription_id = %subscription_id, error = %err, "initial baseline poll failed");
                }
            }
        });

        Ok(subscription)
    }

    /// Delete a subscription, cascading provider states and notification
    /// records. In-flight polls for it finish harmlessly: their final write
    /// is discarded by the store's existence check.
    pub async fn delete(&self, subscription_id: &str) -> crate::Result<()> {
        if self
            .store
            .get_subscription(subscription_id)
            .await?
            .is_none()
        {
            return Err(crate::AppError::NotFound {
                resource: format!("subscription {}", subscription_id),
            });
        }

        self.scheduler
            .unschedule_subscription(subscription_id)
            .await?;
        self.store.delete_subscription(subscription_id).await?;

        info!(subscription_id, "subscription deleted");
        Ok(())
    }

    /// Immediate out-of-band poll cycle, reusing all regular gating.
    /// Returns the per-provider page/item/push counts for display.
    pub async fn force_recheck(&self, subscription_id: &str) -> crate::Result<PollReport> {
        if self
            .store
            .get_subscription(subscription_id)
            .await?
            .is_none()
        {
            return Err(crate::AppError::NotFound {
                resource: format!("subscription {}", subscription_id),
            });
        }

        self.scheduler.run_now(subscription_id).await
    }

    /// Health classification from persisted telemetry and job presence.
    pub async fn health(&self, subscription_id: &str) -> crate::Result<HealthReport> {
        let Some(subscription) = self.store.get_subscription(subscription_id).await? else {
            return Err(crate::AppError::NotFound {
                resource: format!("subscription {}", subscription_id),
            });
        };

        let has_job = self.scheduler.has_job(subscription_id).await;
        let stale_after = Duration::seconds(self.config.stale_success_warn_seconds);
        Ok(subscription.health(Utc::now(), has_job, stale_after))
    }
}
