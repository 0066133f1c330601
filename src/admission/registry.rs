//! Admission registry: per-key state and the expiry sweep.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

use super::entry::Entry;
use super::key::{AdmissionKey, Context, KeyComposer};
use super::result::AdmissionResult;
use super::rules::{Action, ConfigOverride, RuleSet};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::spam::ActivitySource;

/// How long activity history is kept per identity by default.
const DEFAULT_ACTIVITY_RETENTION_MS: u64 = 30_000;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries inspected
    pub examined: usize,
    /// Idle entries deleted
    pub removed: usize,
}

/// Owns every key's admission state.
///
/// Entries live in a sharded map. A check holds its shard's write lock for
/// the whole read-modify-write of the entry, and the sweep takes the same
/// locks, so two checks on one key never act on the same prior state and
/// the sweep never removes an entry mid-update.
pub struct Registry {
    /// Admission state indexed by key
    entries: DashMap<AdmissionKey, Entry>,
    /// Identity → granted activity-tracking timestamps, oldest first
    activity: DashMap<String, VecDeque<u64>>,
    rules: RwLock<RuleSet>,
    keys: KeyComposer,
    clock: Arc<dyn Clock>,
    activity_retention_ms: u64,
}

impl Registry {
    /// Create a registry on the system clock.
    pub fn new(rules: RuleSet) -> Self {
        Self::with_clock(rules, Arc::new(SystemClock))
    }

    /// Create a registry on the given clock.
    pub fn with_clock(rules: RuleSet, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            activity: DashMap::new(),
            rules: RwLock::new(rules),
            keys: KeyComposer::new(),
            clock,
            activity_retention_ms: DEFAULT_ACTIVITY_RETENTION_MS,
        }
    }

    /// Use a specific key composer (e.g. with a known session id).
    pub fn with_key_composer(mut self, keys: KeyComposer) -> Self {
        self.keys = keys;
        self
    }

    /// How much per-identity activity history to keep.
    pub fn with_activity_retention(mut self, retention_ms: u64) -> Self {
        self.activity_retention_ms = retention_ms;
        self
    }

    /// Current time according to the registry's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Replace the rule table. Existing entries pick up new rules on their next check.
    pub fn set_rules(&self, rules: RuleSet) -> Result<()> {
        rules.validate()?;
        *self.rules.write() = rules;
        Ok(())
    }

    /// A copy of the current rule table.
    pub fn rules(&self) -> RuleSet {
        self.rules.read().clone()
    }

    /// Run one admission check and update the key's state.
    pub fn check(
        &self,
        action: Action,
        context: &Context,
        overrides: Option<&ConfigOverride>,
    ) -> Result<AdmissionResult> {
        let rule = self.rules.read().resolve(action, overrides)?;
        let key = self.keys.compose(action, &rule, context);
        let now = self.clock.now_ms();

        trace!(action = %action, key = %key, algorithm = %rule.algorithm, now = now, "Checking admission");

        let result = {
            let mut entry = self.entries.entry(key.clone()).or_insert_with(|| {
                debug!(
                    action = %action,
                    key = %key,
                    algorithm = %rule.algorithm,
                    limit = rule.max_requests,
                    window_ms = rule.window_ms,
                    "Creating admission entry"
                );
                Entry::new(key.clone(), &rule)
            });
            rule.algorithm.apply(&mut entry, &rule, now)
        };

        if result.success && action.tracks_activity() {
            self.record_activity(self.keys.identity(context), now);
        }

        Ok(result)
    }

    fn record_activity(&self, identity: String, now: u64) {
        let retention = self.activity_retention_ms;
        let mut times = self.activity.entry(identity).or_default();
        times.retain(|&t| t.saturating_add(retention) > now);
        times.push_back(now);
    }

    /// Granted activity-tracking requests for `identity` within the last `window_ms`.
    ///
    /// Answers at most as far back as the retention period.
    pub fn recent_activity_for(&self, identity: &str, window_ms: u64) -> usize {
        let now = self.clock.now_ms();
        self.activity
            .get(identity)
            .map(|times| {
                times
                    .iter()
                    .filter(|&&t| t <= now && t.saturating_add(window_ms) > now)
                    .count()
            })
            .unwrap_or(0)
    }

    /// The key a check with these arguments would use.
    pub fn key_for(
        &self,
        action: Action,
        context: &Context,
        overrides: Option<&ConfigOverride>,
    ) -> Result<AdmissionKey> {
        let rule = self.rules.read().resolve(action, overrides)?;
        Ok(self.keys.compose(action, &rule, context))
    }

    /// A copy of a key's state, if it exists.
    pub fn snapshot(&self, key: &AdmissionKey) -> Option<Entry> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Forget a caller's state for one action. Returns whether anything was removed.
    pub fn reset(&self, action: Action, context: &Context) -> Result<bool> {
        let key = self.key_for(action, context, None)?;
        debug!(key = %key, "Resetting admission state");
        Ok(self.entries.remove(&key).is_some())
    }

    /// Remove every entry that no longer affects any decision.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let mut report = SweepReport::default();

        self.entries.retain(|_, entry| {
            report.examined += 1;
            let idle = entry.is_idle(now);
            if idle {
                trace!(key = %entry.key, "Sweeping idle entry");
                report.removed += 1;
            }
            !idle
        });

        let retention = self.activity_retention_ms;
        self.activity.retain(|_, times| {
            times.retain(|&t| t.saturating_add(retention) > now);
            !times.is_empty()
        });

        debug!(
            examined = report.examined,
            removed = report.removed,
            remaining = self.entries.len(),
            "Admission sweep complete"
        );
        report
    }

    /// Clear all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
        self.activity.clear();
    }

    /// Get the number of live entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

impl ActivitySource for Registry {
    fn recent_activity(&self, user_id: &str, window_ms: u64) -> usize {
        self.recent_activity_for(&format!("user:{}", user_id), window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::rules::{Algorithm, Rule};
    use crate::clock::ManualClock;

    fn registry() -> (Registry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Registry::with_clock(RuleSet::defaults(), clock.clone())
            .with_key_composer(KeyComposer::with_session("test"));
        (registry, clock)
    }

    fn limit(max: u64) -> ConfigOverride {
        ConfigOverride {
            max_requests: Some(max),
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_creation() {
        let (registry, _) = registry();
        assert_eq!(registry.entry_count(), 0);
    }

    #[test]
    fn test_check_creates_entry() {
        let (registry, _) = registry();
        let ctx = Context::new().with_user("alice");

        let result = registry.check(Action::MessageSend, &ctx, None).unwrap();
        assert!(result.success);
        assert_eq!(registry.entry_count(), 1);

        let key = registry.key_for(Action::MessageSend, &ctx, None).unwrap();
        let entry = registry.snapshot(&key).unwrap();
        assert_eq!(entry.request_timestamps.len(), 1);
        assert_eq!(entry.algorithm(), Algorithm::SlidingWindow);
    }

    #[test]
    fn test_keys_are_isolated() {
        let (registry, _) = registry();
        let alice = Context::new().with_user("alice");
        let bob = Context::new().with_user("bob");
        let o = limit(2);

        assert!(registry.check(Action::MessageSend, &alice, Some(&o)).unwrap().success);
        assert!(registry.check(Action::MessageSend, &alice, Some(&o)).unwrap().success);
        assert!(!registry.check(Action::MessageSend, &alice, Some(&o)).unwrap().success);

        let result = registry.check(Action::MessageSend, &bob, Some(&o)).unwrap();
        assert!(result.success);
        assert_eq!(result.remaining, 1);
    }

    #[test]
    fn test_resources_are_isolated() {
        let (registry, _) = registry();
        let general = Context::new().with_user("alice").with_resource("general");
        let random = Context::new().with_user("alice").with_resource("random");
        let o = limit(1);

        assert!(registry.check(Action::MessageSend, &general, Some(&o)).unwrap().success);
        assert!(!registry.check(Action::MessageSend, &general, Some(&o)).unwrap().success);
        assert!(registry.check(Action::MessageSend, &random, Some(&o)).unwrap().success);
    }

    #[test]
    fn test_missing_rule_is_configuration_error() {
        let registry = Registry::new(RuleSet::new());
        let err = registry.check(Action::Login, &Context::new(), None).unwrap_err();
        assert!(matches!(err, crate::error::AdmissionError::Configuration(_)));
        assert_eq!(registry.entry_count(), 0);
    }

    #[test]
    fn test_sweep_removes_only_idle_entries() {
        let (registry, clock) = registry();
        let old = Context::new().with_user("old");
        let fresh = Context::new().with_user("fresh");

        registry.check(Action::MessageSend, &old, None).unwrap();
        clock.set(30_000);
        registry.check(Action::MessageSend, &fresh, None).unwrap();

        // "old" is exactly one window old; "fresh" is still inside its window.
        clock.set(60_000);
        let report = registry.sweep();

        assert_eq!(report, SweepReport { examined: 2, removed: 1 });
        let fresh_key = registry.key_for(Action::MessageSend, &fresh, None).unwrap();
        assert!(registry.snapshot(&fresh_key).is_some());
    }

    #[test]
    fn test_sweep_keeps_draining_bucket() {
        let (registry, clock) = registry();
        let ctx = Context::new().with_user("alice");

        for _ in 0..20 {
            registry.check(Action::ApiCall, &ctx, None).unwrap();
        }

        // 60s later 100 tokens have accrued, more than the burst of 20.
        clock.set(59_999);
        assert_eq!(registry.sweep().removed, 0);
        clock.set(60_000);
        assert_eq!(registry.sweep().removed, 1);
    }

    #[test]
    fn test_sweep_uses_entry_window() {
        let (registry, clock) = registry();
        let ctx = Context::new().with_user("alice");
        let long = ConfigOverride {
            window_ms: Some(120_000),
            ..Default::default()
        };

        registry.check(Action::MessageSend, &ctx, Some(&long)).unwrap();
        clock.set(60_000);
        assert_eq!(registry.sweep().removed, 0);
        clock.set(120_000);
        assert_eq!(registry.sweep().removed, 1);
    }

    #[test]
    fn test_reset_forgets_state() {
        let (registry, _) = registry();
        let ctx = Context::new().with_ip("10.0.0.1");
        let o = limit(1);

        registry.check(Action::Login, &ctx, Some(&o)).unwrap();
        assert!(!registry.check(Action::Login, &ctx, Some(&o)).unwrap().success);

        assert!(registry.reset(Action::Login, &ctx).unwrap());
        assert!(registry.check(Action::Login, &ctx, Some(&o)).unwrap().success);
    }

    #[test]
    fn test_shared_key_fn_output_keeps_actions_apart() {
        let (registry, _) = registry();
        let ctx = Context::new().with_user("alice");
        let by_user = |ctx: &Context| ctx.user_id.clone().unwrap_or_default();

        let mut rules = RuleSet::defaults();
        rules
            .insert(Action::Login, Rule::sliding_window(1, 60_000).with_key_fn(by_user))
            .unwrap();
        rules
            .insert(Action::MessageSend, Rule::sliding_window(1, 60_000).with_key_fn(by_user))
            .unwrap();
        rules
            .insert(Action::ApiCall, Rule::token_bucket(10, 60_000, 5, 10).with_key_fn(by_user))
            .unwrap();
        registry.set_rules(rules).unwrap();

        assert!(registry.check(Action::Login, &ctx, None).unwrap().success);
        assert!(registry.check(Action::MessageSend, &ctx, None).unwrap().success);
        // A different algorithm on the same key string must not reset the login window.
        assert!(registry.check(Action::ApiCall, &ctx, None).unwrap().success);
        assert!(!registry.check(Action::Login, &ctx, None).unwrap().success);
        assert_eq!(registry.entry_count(), 3);

        let login = registry.key_for(Action::Login, &ctx, None).unwrap();
        assert_eq!(login.as_str(), "alice");
        assert_eq!(registry.snapshot(&login).unwrap().algorithm(), Algorithm::SlidingWindow);
    }

    #[test]
    fn test_activity_index_counts_messages_per_user() {
        let (registry, clock) = registry();
        let alice = Context::new().with_user("alice").with_resource("general");

        for i in 0..5 {
            clock.set(i * 1_000);
            registry.check(Action::MessageSend, &alice, None).unwrap();
        }
        // Other actions do not count as activity.
        registry.check(Action::FileUpload, &alice, None).unwrap();

        assert_eq!(registry.recent_activity("alice", 30_000), 5);
        assert_eq!(registry.recent_activity("bob", 30_000), 0);

        clock.set(32_500);
        assert_eq!(registry.recent_activity("alice", 30_000), 2);
    }

    #[test]
    fn test_sweep_prunes_activity_index() {
        let (registry, clock) = registry();
        let alice = Context::new().with_user("alice");

        registry.check(Action::MessageSend, &alice, None).unwrap();
        assert_eq!(registry.activity.len(), 1);

        clock.set(29_999);
        registry.sweep();
        assert_eq!(registry.activity.len(), 1);

        clock.set(30_000);
        registry.sweep();
        assert!(registry.activity.is_empty());
        assert_eq!(registry.recent_activity("alice", 30_000), 0);
        // The message entry itself is still inside its 60s window.
        assert_eq!(registry.entry_count(), 1);
    }

    #[test]
    fn test_denied_checks_are_not_activity() {
        let (registry, _) = registry();
        let alice = Context::new().with_user("alice");
        let o = limit(1);

        registry.check(Action::MessageSend, &alice, Some(&o)).unwrap();
        registry.check(Action::MessageSend, &alice, Some(&o)).unwrap();
        assert_eq!(registry.recent_activity("alice", 30_000), 1);
    }

    #[test]
    fn test_set_rules_applies_to_next_check() {
        let (registry, _) = registry();
        let ctx = Context::new().with_user("alice");

        let mut rules = RuleSet::defaults();
        rules.insert(Action::SearchQuery, Rule::fixed_window(1, 60_000)).unwrap();
        registry.set_rules(rules).unwrap();

        assert!(registry.check(Action::SearchQuery, &ctx, None).unwrap().success);
        assert!(!registry.check(Action::SearchQuery, &ctx, None).unwrap().success);
    }

    #[test]
    fn test_concurrent_checks_never_over_admit() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(Registry::with_clock(RuleSet::defaults(), clock));
        let ctx = Context::new().with_user("alice");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| {
                            registry
                                .check(Action::MessageSend, &ctx, Some(&limit(50)))
                                .unwrap()
                                .success
                        })
                        .count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
    }
}
