//! Per-key admission state.

use std::collections::VecDeque;

use super::key::AdmissionKey;
use super::rules::{Algorithm, Rule};

/// Mutable state for one key, created lazily on its first check.
///
/// Only the fields used by the entry's current algorithm are populated. The
/// policy of the most recent check is remembered so the sweep can judge
/// idleness against the window that actually applies to this key.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: AdmissionKey,
    /// Granted request times, oldest first (sliding and fixed window)
    pub request_timestamps: VecDeque<u64>,
    /// Current token balance (token bucket)
    pub tokens: Option<f64>,
    /// Time the balance was last brought up to date (token bucket)
    pub last_refill: Option<u64>,
    /// Start of the active window (fixed window)
    pub window_start: Option<u64>,
    algorithm: Algorithm,
    window_ms: u64,
    burst_size: u64,
    refill_rate: u64,
}

impl Entry {
    pub fn new(key: AdmissionKey, rule: &Rule) -> Self {
        Self {
            key,
            request_timestamps: VecDeque::new(),
            tokens: None,
            last_refill: None,
            window_start: None,
            algorithm: rule.algorithm,
            window_ms: rule.window_ms,
            burst_size: rule.burst_size(),
            refill_rate: rule.refill_rate(),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Take on the policy of the current check. Switching algorithm discards
    /// the old state, since it means nothing to the new one.
    pub(crate) fn adopt(&mut self, rule: &Rule) {
        if self.algorithm != rule.algorithm {
            self.request_timestamps.clear();
            self.tokens = None;
            self.last_refill = None;
            self.window_start = None;
            self.algorithm = rule.algorithm;
        }
        self.window_ms = rule.window_ms;
        self.burst_size = rule.burst_size();
        self.refill_rate = rule.refill_rate();
    }

    /// Whether nothing about this entry would affect a future decision.
    ///
    /// Window algorithms: every recorded request is at least one window old.
    /// Token bucket: the balance has refilled to capacity and the last
    /// refill is at least one window old.
    pub fn is_idle(&self, now: u64) -> bool {
        match self.algorithm {
            Algorithm::SlidingWindow | Algorithm::FixedWindow => self
                .request_timestamps
                .iter()
                .all(|&t| t.saturating_add(self.window_ms) <= now),
            Algorithm::TokenBucket => match (self.tokens, self.last_refill) {
                (Some(tokens), Some(last_refill)) => {
                    let elapsed = now.saturating_sub(last_refill);
                    let projected = tokens
                        + elapsed as f64 * self.refill_rate as f64 / self.window_ms as f64;
                    projected >= self.burst_size as f64
                        && last_refill.saturating_add(self.window_ms) <= now
                }
                _ => true,
            },
        }
    }
}
