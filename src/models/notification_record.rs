use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::generate_id;

/// Idempotency witness for one (subscription, listing) push.
///
/// At most one record per (subscription_id, listing_key) ever exists; the
/// store enforces this with an atomic create-if-absent. Creation is the only
/// action gated before a message is actually sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    pub id: String,
    pub subscription_id: String,
    pub listing_key: String,
    pub sent_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(subscription_id: &str, listing_key: &str) -> Self {
        Self {
            id: generate_id(),
            subscription_id: subscription_id.to_string(),
            listing_key: listing_key.to_string(),
            sent_at: Utc::now(),
        }
    }
}
