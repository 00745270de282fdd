use async_trait::async_trait;

use crate::models::{NotificationRecord, Subscription};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Document-style persistence for subscriptions and notification records.
///
/// A subscription is stored as one document including all of its provider
/// states and seen-key sets, written atomically per subscription.
/// `create_notification_if_absent` must be race-free: it is the idempotency
/// primitive behind exactly-once notification enqueue.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_subscription(&self, subscription: &Subscription) -> crate::Result<()>;

    async fn get_subscription(&self, id: &str) -> crate::Result<Option<Subscription>>;

    async fn find_by_keyword(
        &self,
        user_id: &str,
        normalized_keyword: &str,
    ) -> crate::Result<Option<Subscription>>;

    async fn list_active_subscriptions(&self) -> crate::Result<Vec<Subscription>>;

    /// Write back a mutated subscription. Returns false when the subscription
    /// no longer exists (deleted mid-poll); the caller discards its changes.
    async fn update_subscription(&self, subscription: &Subscription) -> crate::Result<bool>;

    /// Delete a subscription, cascading its notification records.
    async fn delete_subscription(&self, id: &str) -> crate::Result<()>;

    /// Atomic create-if-absent keyed by (subscription_id, listing_key).
    /// Returns true when the record was freshly created.
    async fn create_notification_if_absent(
        &self,
        record: &NotificationRecord,
    ) -> crate::Result<bool>;

    async fn count_notifications(&self, subscription_id: &str) -> crate::Result<u64>;
}
