use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::models::Listing;

/// Outcome of the newness gate for one candidate listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Genuinely new: notify.
    Push,
    /// Already accounted for in the seen-key set.
    AlreadySeen,
    /// Older than the subscription, or timestampless beyond the grace window.
    TooOld,
    /// Same key already pushed earlier in this poll cycle.
    Duplicate,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Push => "push",
            Decision::AlreadySeen => "already_seen",
            Decision::TooOld => "too_old",
            Decision::Duplicate => "duplicate",
        }
    }
}

/// Pure newness decision over one candidate listing.
///
/// `seen_keys` is the persisted seen set as of the start of the cycle;
/// `pushed_this_cycle` holds keys already decided `Push` during the current
/// cycle, which guards against a listing appearing on two scanned pages.
#[derive(Debug, Clone)]
pub struct NewnessGate {
    grace_window: Duration,
}

impl NewnessGate {
    pub fn new(grace_minutes: i64) -> Self {
        Self {
            grace_window: Duration::minutes(grace_minutes),
        }
    }

    pub fn decide(
        &self,
        listing: &Listing,
        seen_keys: &HashSet<String>,
        pushed_this_cycle: &HashSet<String>,
        since_ts: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Decision {
        let key = listing.canonical_key();

        if seen_keys.contains(&key) {
            return Decision::AlreadySeen;
        }

        if pushed_this_cycle.contains(&key) {
            return Decision::Duplicate;
        }

        match listing.posted_ts {
            // Boundary is inclusive: an item posted exactly at since_ts is new
            Some(posted_ts) => {
                if posted_ts >= since_ts {
                    Decision::Push
                } else {
                    Decision::TooOld
                }
            }
            // Without a timestamp, only push close to subscription creation
            None => {
                if now - since_ts <= self.grace_window {
                    Decision::Push
                } else {
                    Decision::TooOld
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn listing(id: &str, posted_ts: Option<DateTime<Utc>>) -> Listing {
        Listing {
            platform: "militaria321.com".to_string(),
            platform_id: id.to_string(),
            title: "Test listing".to_string(),
            url: format!("https://www.militaria321.com/auktion/{}/x", id),
            price: None,
            posted_ts,
            page_index: 1,
        }
    }

    fn gate() -> NewnessGate {
        NewnessGate::new(60)
    }

    #[test]
    fn test_seen_key_is_always_already_seen() {
        let g = gate();
        let since = Utc::now();
        let l = listing("123", Some(since + Duration::hours(1)));

        let mut seen = HashSet::new();
        seen.insert(l.canonical_key());

        // Even a listing that would otherwise push is absorbed by the seen set
        let decision = g.decide(&l, &seen, &HashSet::new(), since, Utc::now());
        assert_eq!(decision, Decision::AlreadySeen);
    }

    #[test]
    fn test_posted_after_since_pushes() {
        let g = gate();
        let since = Utc::now();
        let l = listing("123", Some(since + Duration::minutes(5)));

        let decision = g.decide(&l, &HashSet::new(), &HashSet::new(), since, Utc::now());
        assert_eq!(decision, Decision::Push);
    }

    #[test]
    fn test_posted_before_since_is_too_old() {
        let g = gate();
        let since = Utc::now();
        let l = listing("123", Some(since - Duration::seconds(1)));

        let decision = g.decide(&l, &HashSet::new(), &HashSet::new(), since, Utc::now());
        assert_eq!(decision, Decision::TooOld);
    }

    #[test]
    fn test_boundary_at_equality_is_inclusive() {
        let g = gate();
        let since = Utc::now();
        let l = listing("123", Some(since));

        let decision = g.decide(&l, &HashSet::new(), &HashSet::new(), since, Utc::now());
        assert_eq!(decision, Decision::Push);
    }

    #[rstest]
    #[case(59, Decision::Push)]
    #[case(60, Decision::Push)]
    #[case(61, Decision::TooOld)]
    fn test_grace_window_boundary(#[case] minutes_elapsed: i64, #[case] expected: Decision) {
        let g = gate();
        let now = Utc::now();
        let since = now - Duration::minutes(minutes_elapsed);
        let l = listing("123", None);

        let decision = g.decide(&l, &HashSet::new(), &HashSet::new(), since, now);
        assert_eq!(decision, expected);
    }

    #[test]
    fn test_duplicate_within_cycle() {
        let g = gate();
        let since = Utc::now();
        let l = listing("123", Some(since + Duration::minutes(5)));

        let mut pushed = HashSet::new();
        let first = g.decide(&l, &HashSet::new(), &pushed, since, Utc::now());
        assert_eq!(first, Decision::Push);
        pushed.insert(l.canonical_key());

        // Same key surfacing on a later page of the same cycle
        let mut repeat = l.clone();
        repeat.page_index = 7;
        let second = g.decide(&repeat, &HashSet::new(), &pushed, since, Utc::now());
        assert_eq!(second, Decision::Duplicate);
    }

    #[test]
    fn test_seen_set_wins_over_duplicate() {
        let g = gate();
        let since = Utc::now();
        let l = listing("123", Some(since + Duration::minutes(5)));

        let mut seen = HashSet::new();
        seen.insert(l.canonical_key());
        let mut pushed = HashSet::new();
        pushed.insert(l.canonical_key());

        let decision = g.decide(&l, &seen, &pushed, since, Utc::now());
        assert_eq!(decision, Decision::AlreadySeen);
    }
}
