use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod listing;
pub mod notification_record;
pub mod provider_state;
pub mod subscription;

// Re-exports for convenience
pub use listing::*;
pub use notification_record::*;
pub use provider_state::*;
pub use subscription::*;

// Common enums used across models

/// Baseline crawl state machine for one (subscription, provider) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BaselineStatus {
    Pending,
    Running,
    Complete,
    Partial,
    Error,
}

/// Pagination strategy used when polling a provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PollStrategy {
    Exhaustive,
    RotatingWindow,
}

/// Severity of a throttling signal, mapped to different cooldown lengths.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CooldownSeverity {
    RateLimited,
    Blocked,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionHealth {
    Healthy,
    Degraded,
    Broken,
}

// Helper function to generate UUIDs in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
