use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BaselineStatus, CooldownSeverity, PollStrategy};

/// Per-(subscription, provider) crawl bookkeeping: baseline state machine,
/// pagination cursor and the seen-key set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderState {
    pub platform: String,

    // Baseline state machine
    pub baseline_status: BaselineStatus,
    pub baseline_started_ts: Option<DateTime<Utc>>,
    pub baseline_completed_ts: Option<DateTime<Utc>>,
    pub baseline_pages_scanned: u32,
    pub baseline_items_collected: u32,

    // Crawl bookkeeping
    pub strategy: PollStrategy,
    pub poll_cursor_page: u32,
    pub total_pages_estimate: Option<u32>,
    pub error_count: u32,

    // Throttling
    pub cooldown_until: Option<DateTime<Utc>>,
    pub cooldown_severity: Option<CooldownSeverity>,

    /// Canonical keys of every listing already accounted for. Only grows;
    /// keys are removed solely by subscription deletion or migration rebuild.
    pub seen_keys: HashSet<String>,
}

impl ProviderState {
    pub fn new(platform: &str, strategy: PollStrategy) -> Self {
        Self {
            platform: platform.to_string(),
            baseline_status: BaselineStatus::Pending,
            baseline_started_ts: None,
            baseline_completed_ts: None,
            baseline_pages_scanned: 0,
            baseline_items_collected: 0,
            strategy,
            poll_cursor_page: 1,
            total_pages_estimate: None,
            error_count: 0,
            cooldown_until: None,
            cooldown_severity: None,
            seen_keys: HashSet::new(),
        }
    }

    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        matches!(self.cooldown_until, Some(until) if now < until)
    }

    pub fn set_cooldown(&mut self, until: DateTime<Utc>, severity: CooldownSeverity) {
        self.cooldown_until = Some(until);
        self.cooldown_severity = Some(severity);
    }

    pub fn clear_cooldown(&mut self) {
        self.cooldown_until = None;
        self.cooldown_severity = None;
    }

    /// Detect states written before the canonical-key scheme existed.
    ///
    /// A state that claims a finished baseline but holds an empty seen set,
    /// or keys that fail the `platform:digits` shape, must be rebuilt from
    /// scratch without emitting notifications.
    pub fn requires_rebuild(&self) -> bool {
        if !matches!(
            self.baseline_status,
            BaselineStatus::Complete | BaselineStatus::Partial
        ) {
            return false;
        }

        if self.seen_keys.is_empty() {
            return true;
        }

        self.seen_keys
            .iter()
            .take(5)
            .any(|key| !Self::is_canonical_key(key))
    }

    fn is_canonical_key(key: &str) -> bool {
        match key.split_once(':') {
            Some((platform, id)) => {
                !platform.is_empty() && !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
            }
            None => false,
        }
    }

    /// Reset for a silent rebuild. The malformed keys are discarded; the
    /// following baseline run absorbs the current result set without pushes.
    pub fn reset_for_rebuild(&mut self) {
        self.baseline_status = BaselineStatus::Pending;
        self.baseline_started_ts = None;
        self.baseline_completed_ts = None;
        self.baseline_pages_scanned = 0;
        self.baseline_items_collected = 0;
        self.seen_keys.clear();
    }
}
