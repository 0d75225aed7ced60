//! RateLimiter — spec §4.2. Local mirror of the venue's per-pair rate
//! counter with decay; gates order commands before they reach the
//! exchange collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandPriority {
    New,
    NormalAmend,
    RiskAmend,
    Cancel,
}

impl CommandPriority {
    /// Higher rank wins on contention: cancel > risk-amend > normal-amend > new.
    fn rank(self) -> u8 {
        match self {
            CommandPriority::Cancel => 3,
            CommandPriority::RiskAmend => 2,
            CommandPriority::NormalAmend => 1,
            CommandPriority::New => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub max: f64,
    pub decay_per_sec: f64,
    pub headroom_pct: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { max: 100.0, decay_per_sec: 10.0, headroom_pct: 0.80 }
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    counter: f64,
    last_decay_at: DateTime<Utc>,
    last_admit_at: Option<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, now: DateTime<Utc>) -> Self {
        Self { config, counter: 0.0, last_decay_at: now, last_admit_at: None }
    }

    /// Decays the local counter by elapsed seconds. Must be called once
    /// per tick before `try_admit`.
    pub fn decay(&mut self, now: DateTime<Utc>) {
        let dt = (now - self.last_decay_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.counter = (self.counter - self.config.decay_per_sec * dt).max(0.0);
        self.last_decay_at = now;
    }

    /// Admits a command of cost `k` iff `counter + k ≤ max × headroom_pct`.
    /// Exhaustion is not an error; the caller retries next tick.
    pub fn try_admit(&mut self, k: f64, now: DateTime<Utc>) -> bool {
        let cap = self.config.max * self.config.headroom_pct;
        if self.counter + k <= cap {
            self.counter += k;
            self.last_admit_at = Some(now);
            true
        } else {
            false
        }
    }

    /// Reconciles against the venue's authoritative counter by taking
    /// the maximum, per spec §4.2.
    pub fn reconcile(&mut self, venue_counter: f64) {
        self.counter = self.counter.max(venue_counter);
    }

    pub fn counter(&self) -> f64 {
        self.counter
    }

    pub fn headroom(&self) -> f64 {
        (self.config.max * self.config.headroom_pct - self.counter).max(0.0)
    }

    pub fn last_admit_at(&self) -> Option<DateTime<Utc>> {
        self.last_admit_at
    }
}

/// Sorts intents for dispatch by venue priority (cancel first).
pub fn sort_by_priority<T>(items: &mut [T], priority_of: impl Fn(&T) -> CommandPriority) {
    items.sort_by_key(|item| std::cmp::Reverse(priority_of(item).rank()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn admits_up_to_headroom_cap() {
        let now = Utc::now();
        let mut rl = RateLimiter::new(
            RateLimiterConfig { max: 100.0, decay_per_sec: 10.0, headroom_pct: 0.8 },
            now,
        );
        assert!(rl.try_admit(79.0, now));
        assert!(!rl.try_admit(2.0, now));
        assert!(rl.try_admit(1.0, now));
    }

    #[test]
    fn decay_frees_headroom_over_time() {
        let now = Utc::now();
        let mut rl = RateLimiter::new(
            RateLimiterConfig { max: 100.0, decay_per_sec: 10.0, headroom_pct: 0.8 },
            now,
        );
        assert!(rl.try_admit(80.0, now));
        assert!(!rl.try_admit(1.0, now));
        let later = now + Duration::seconds(2);
        rl.decay(later);
        assert!(rl.try_admit(10.0, later));
    }

    #[test]
    fn reconcile_takes_max_of_local_and_venue() {
        let now = Utc::now();
        let mut rl = RateLimiter::new(RateLimiterConfig::default(), now);
        rl.try_admit(5.0, now);
        rl.reconcile(50.0);
        assert_eq!(rl.counter(), 50.0);
        rl.reconcile(10.0);
        assert_eq!(rl.counter(), 50.0);
    }

    #[test]
    fn priority_order_is_cancel_then_risk_amend_then_amend_then_new() {
        let mut v = vec![
            CommandPriority::New,
            CommandPriority::Cancel,
            CommandPriority::NormalAmend,
            CommandPriority::RiskAmend,
        ];
        sort_by_priority(&mut v, |p| *p);
        assert_eq!(
            v,
            vec![
                CommandPriority::Cancel,
                CommandPriority::RiskAmend,
                CommandPriority::NormalAmend,
                CommandPriority::New
            ]
        );
    }
}
