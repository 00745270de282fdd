use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    generate_id, BaselineStatus, PollStrategy, ProviderState, SubscriptionHealth,
};
use crate::utils::text::normalize_keyword;

/// One user's watch on one keyword across all providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub keyword: String,
    pub normalized_keyword: String,

    /// Subscription creation time, UTC. Immutable: every newness decision
    /// for this subscription is relative to it.
    pub since_ts: DateTime<Utc>,

    // Status
    pub is_active: bool,
    pub is_paused: bool,

    // Health telemetry
    pub last_checked: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,

    /// Per-provider crawl state, keyed by platform name.
    pub provider_states: HashMap<String, ProviderState>,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub user_id: String,
    pub keyword: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status: SubscriptionHealth,
    pub reason: String,
}

impl Subscription {
    pub fn new(new_subscription: NewSubscription) -> Self {
        let now = Utc::now();
        let normalized = normalize_keyword(&new_subscription.keyword);
        Self {
            id: generate_id(),
            user_id: new_subscription.user_id,
            keyword: new_subscription.keyword,
            normalized_keyword: normalized,
            since_ts: now,
            is_active: true,
            is_paused: false,
            last_checked: None,
            last_success: None,
            consecutive_failures: 0,
            last_error: None,
            provider_states: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Make sure a ProviderState exists for every registered platform.
    /// Subscriptions created before a provider was added gain its state here.
    pub fn ensure_provider_states(&mut self, platforms: &[&str], strategy: PollStrategy) {
        for platform in platforms {
            self.provider_states
                .entry(platform.to_string())
                .or_insert_with(|| ProviderState::new(platform, strategy));
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_checked = Some(now);
        self.last_success = Some(now);
        self.consecutive_failures = 0;
        self.last_error = None;
        self.updated_at = now;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>, error: &str) {
        self.last_checked = Some(now);
        self.consecutive_failures += 1;
        self.last_error = Some(error.chars().take(500).collect());
        self.updated_at = now;
    }

    /// Classify subscription health from persisted telemetry.
    pub fn health(
        &self,
        now: DateTime<Utc>,
        has_job: bool,
        stale_after: Duration,
    ) -> HealthReport {
        const FAILURE_THRESHOLD: u32 = 3;

        if !has_job {
            return HealthReport {
                status: SubscriptionHealth::Broken,
                reason: "no scheduler job active".to_string(),
            };
        }

        if let Some(state) = self
            .provider_states
            .values()
            .find(|s| s.baseline_status == BaselineStatus::Error)
        {
            return HealthReport {
                status: SubscriptionHealth::Broken,
                reason: format!("baseline stuck in error for {}", state.platform),
            };
        }

        if let Some(state) = self
            .provider_states
            .values()
            .find(|s| s.baseline_status != BaselineStatus::Complete)
        {
            return HealthReport {
                status: SubscriptionHealth::Degraded,
                reason: format!(
                    "baseline {:?} for {}",
                    state.baseline_status, state.platform
                ),
            };
        }

        if self.consecutive_failures >= FAILURE_THRESHOLD {
            let mut reason = format!("last {} polls failed", self.consecutive_failures);
            if let Some(err) = &self.last_error {
                reason.push_str(": ");
                reason.push_str(&err.chars().take(100).collect::<String>());
            }
            return HealthReport {
                status: SubscriptionHealth::Degraded,
                reason,
            };
        }

        match self.last_success {
            Some(last) if now - last > stale_after => HealthReport {
                status: SubscriptionHealth::Degraded,
                reason: format!("no successful poll for {} minutes", (now - last).num_minutes()),
            },
            None if self.last_error.is_some() => HealthReport {
                status: SubscriptionHealth::Degraded,
                reason: "no successful poll yet".to_string(),
            },
            _ => HealthReport {
                status: SubscriptionHealth::Healthy,
                reason: "last poll successful".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> Subscription {
        Subscription::new(NewSubscription {
            user_id: "user1".to_string(),
            keyword: "Eisernes  Kreuz".to_string(),
        })
    }

    fn complete_states(sub: &mut Subscription) {
        sub.ensure_provider_states(&["militaria321.com"], PollStrategy::Exhaustive);
        for state in sub.provider_states.values_mut() {
            state.baseline_status = BaselineStatus::Complete;
            state.seen_keys.insert("militaria321.com:1".to_string());
        }
    }

    #[test]
    fn test_subscription_creation() {
        let sub = subscription();
        assert_eq!(sub.keyword, "Eisernes  Kreuz");
        assert_eq!(sub.normalized_keyword, "eisernes kreuz");
        assert!(sub.is_active);
        assert!(!sub.is_paused);
        assert_eq!(sub.consecutive_failures, 0);
        assert!(sub.provider_states.is_empty());
        assert_eq!(sub.since_ts, sub.created_at);
    }

    #[test]
    fn test_ensure_provider_states_is_idempotent() {
        let mut sub = subscription();
        sub.ensure_provider_states(&["militaria321.com", "egun.de"], PollStrategy::Exhaustive);
        assert_eq!(sub.provider_states.len(), 2);

        sub.provider_states
            .get_mut("egun.de")
            .unwrap()
            .seen_keys
            .insert("egun.de:42".to_string());

        // Re-running must not reset existing state
        sub.ensure_provider_states(&["militaria321.com", "egun.de"], PollStrategy::Exhaustive);
        assert_eq!(
            sub.provider_states["egun.de"].seen_keys.len(),
            1
        );
    }

    #[test]
    fn test_telemetry_success_resets_failures() {
        let mut sub = subscription();
        let now = Utc::now();
        sub.record_failure(now, "boom");
        sub.record_failure(now, "boom");
        assert_eq!(sub.consecutive_failures, 2);
        assert!(sub.last_success.is_none());

        sub.record_success(now);
        assert_eq!(sub.consecutive_failures, 0);
        assert!(sub.last_error.is_none());
        assert_eq!(sub.last_success, Some(now));
    }

    #[test]
    fn test_health_missing_job_is_broken() {
        let mut sub = subscription();
        complete_states(&mut sub);
        let report = sub.health(Utc::now(), false, Duration::minutes(10));
        assert_eq!(report.status, SubscriptionHealth::Broken);
    }

    #[test]
    fn test_health_incomplete_baseline_is_degraded() {
        let mut sub = subscription();
        sub.ensure_provider_states(&["militaria321.com"], PollStrategy::Exhaustive);
        let now = Utc::now();
        sub.record_success(now);
        let report = sub.health(now, true, Duration::minutes(10));
        assert_eq!(report.status, SubscriptionHealth::Degraded);
        assert!(report.reason.contains("baseline"));
    }

    #[test]
    fn test_health_repeated_failures_is_degraded() {
        let mut sub = subscription();
        complete_states(&mut sub);
        let now = Utc::now();
        sub.record_success(now);
        for _ in 0..3 {
            sub.record_failure(now, "network unreachable");
        }
        let report = sub.health(now, true, Duration::minutes(10));
        assert_eq!(report.status, SubscriptionHealth::Degraded);
        assert!(report.reason.contains("3 polls failed"));
    }

    #[test]
    fn test_health_stale_success_is_degraded() {
        let mut sub = subscription();
        complete_states(&mut sub);
        let now = Utc::now();
        sub.record_success(now - Duration::minutes(30));
        let report = sub.health(now, true, Duration::minutes(10));
        assert_eq!(report.status, SubscriptionHealth::Degraded);
        assert!(report.reason.contains("no successful poll for"));
    }

    #[test]
    fn test_health_healthy() {
        let mut sub = subscription();
        complete_states(&mut sub);
        let now = Utc::now();
        sub.record_success(now);
        let report = sub.health(now, true, Duration::minutes(10));
        assert_eq!(report.status, SubscriptionHealth::Healthy);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut sub = subscription();
        complete_states(&mut sub);
        let serialized = serde_json::to_string(&sub).unwrap();
        let deserialized: Subscription = serde_json::from_str(&serialized).unwrap();
        assert_eq!(sub, deserialized);
    }
}
