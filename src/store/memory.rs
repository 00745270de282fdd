use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{NotificationRecord, Subscription};
use crate::store::Store;

/// In-memory store. Zero-setup default for tests and dry runs; mirrors the
/// SQLite store's semantics including the atomic create-if-absent.
#[derive(Default)]
pub struct MemoryStore {
    subscriptions: RwLock<HashMap<String, Subscription>>,
    notifications: RwLock<HashSet<(String, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> crate::Result<()> {
        let mut subs = self.subscriptions.write().await;
        subs.insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> crate::Result<Option<Subscription>> {
        let subs = self.subscriptions.read().await;
        Ok(subs.get(id).cloned())
    }

    async fn find_by_keyword(
        &self,
        user_id: &str,
        normalized_keyword: &str,
    ) -> crate::Result<Option<Subscription>> {
        let subs = self.subscriptions.read().await;
        Ok(subs
            .values()
            .find(|s| s.user_id == user_id && s.normalized_keyword == normalized_keyword)
            .cloned())
    }

    async fn list_active_subscriptions(&self) -> crate::Result<Vec<Subscription>> {
        let subs = self.subscriptions.read().await;
        let mut active: Vec<Subscription> =
            subs.values().filter(|s| s.is_active).cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn update_subscription(&self, subscription: &Subscription) -> crate::Result<bool> {
        let mut subs = self.subscriptions.write().await;
        match subs.get_mut(&subscription.id) {
            Some(existing) => {
                *existing = subscription.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_subscription(&self, id: &str) -> crate::Result<()> {
        let mut subs = self.subscriptions.write().await;
        subs.remove(id);
        drop(subs);

        let mut notifications = self.notifications.write().await;
        notifications.retain(|(subscription_id, _)| subscription_id != id);
        Ok(())
    }

    async fn create_notification_if_absent(
        &self,
        record: &NotificationRecord,
    ) -> crate::Result<bool> {
        let mut notifications = self.notifications.write().await;
        Ok(notifications.insert((
            record.subscription_id.clone(),
            record.listing_key.clone(),
        )))
    }

    async fn count_notifications(&self, subscription_id: &str) -> crate::Result<u64> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|(sid, _)| sid == subscription_id)
            .count() as u64)
    }
}
