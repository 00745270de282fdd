use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::models::{Listing, NotificationRecord, Subscription};
use crate::store::Store;

pub mod webhook;

pub use webhook::WebhookNotifier;

/// Outbound notification channel. Invoked only after the idempotency check
/// succeeded; delivery failures are logged, not rolled back.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, subscription: &Subscription, listing: &Listing) -> crate::Result<()>;
}

/// Fallback notifier that only writes to the log. Used when no webhook is
/// configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, subscription: &Subscription, listing: &Listing) -> crate::Result<()> {
        info!(
            subscription_id = %subscription.id,
            keyword = %subscription.keyword,
            listing_key = %listing.canonical_key(),
            title = %listing.title,
            url = %listing.url,
            "new listing"
        );
        Ok(())
    }
}

/// Guards every push with an atomic check-and-create of the notification
/// record: the final safety net against duplicate delivery from retried
/// cycles, restarts mid-cycle, or overlapping manual checks.
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Returns true when the push was enqueued, false when it was suppressed
    /// because a record for this (subscription, listing) already exists.
    pub async fn dispatch(
        &self,
        subscription: &Subscription,
        listing: &Listing,
    ) -> crate::Result<bool> {
        let listing_key = listing.canonical_key();
        let record = NotificationRecord::new(&subscription.id, &listing_key);

        if !self.store.create_notification_if_absent(&record).await? {
            debug!(
                subscription_id = %subscription.id,
                listing_key = %listing_key,
                "notification already sent, suppressing"
            );
            metrics::counter!("argus_notifications_suppressed_total").increment(1);
            return Ok(false);
        }

        if let Err(err) = self.notifier.notify(subscription, listing).await {
            // At-most-once enqueue: the record stands even when delivery fails
            warn!(
                subscription_id = %subscription.id,
                listing_key = %listing_key,
                notifier = self.notifier.name(),
                error = %err,
                "notification delivery failed"
            );
        } else {
            metrics::counter!("argus_notifications_sent_total").increment(1);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::models::{NewSubscription, Price};
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    pub struct CollectingNotifier {
        pub sent: Mutex<Vec<String>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Notifier for CollectingNotifier {
        fn name(&self) -> &str {
            "collecting"
        }

        async fn notify(
            &self,
            _subscription: &Subscription,
            listing: &Listing,
        ) -> crate::Result<()> {
            if self.fail {
                return Err(crate::AppError::Internal("delivery refused".to_string()));
            }
            self.sent.lock().unwrap().push(listing.canonical_key());
            Ok(())
        }
    }

    fn listing(id: &str) -> Listing {
        Listing {
            platform: "militaria321.com".to_string(),
            platform_id: id.to_string(),
            title: "Pickelhaube M1895".to_string(),
            url: format!("https://www.militaria321.com/auktion/{}/x", id),
            price: Some(Price::eur(Decimal::new(24900, 2))),
            posted_ts: None,
            page_index: 1,
        }
    }

    fn subscription() -> Subscription {
        let mut sub = Subscription::new(NewSubscription {
            user_id: "user1".to_string(),
            keyword: "pickelhaube".to_string(),
        });
        sub.id = "sub1".to_string();
        sub
    }

    #[tokio::test]
    async fn test_dispatch_sends_once_per_listing() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(CollectingNotifier {
            sent: Mutex::new(vec![]),
            fail: false,
        });
        let dispatcher = NotificationDispatcher::new(store.clone(), notifier.clone());

        let sub = subscription();
        store.insert_subscription(&sub).await.unwrap();
        let l = listing("123");

        assert!(dispatcher.dispatch(&sub, &l).await.unwrap());
        // Second dispatch for the same key is suppressed
        assert!(!dispatcher.dispatch(&sub, &l).await.unwrap());

        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(store.count_notifications("sub1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_record() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(CollectingNotifier {
            sent: Mutex::new(vec![]),
            fail: true,
        });
        let dispatcher = NotificationDispatcher::new(store.clone(), notifier);

        let sub = subscription();
        store.insert_subscription(&sub).await.unwrap();
        let l = listing("123");

        // Enqueue succeeds even though delivery fails, and the record
        // prevents a re-send on the next cycle
        assert!(dispatcher.dispatch(&sub, &l).await.unwrap());
        assert!(!dispatcher.dispatch(&sub, &l).await.unwrap());
        assert_eq!(store.count_notifications("sub1").await.unwrap(), 1);
    }
}
