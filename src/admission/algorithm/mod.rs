//! Counting algorithms.
//!
//! Each algorithm is a pure function of `(entry, rule, now)`: it updates the
//! entry in place and returns the decision. Callers are responsible for
//! holding the entry exclusively for the duration of the call.

pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

use super::entry::Entry;
use super::result::AdmissionResult;
use super::rules::{Algorithm, Rule};

impl Algorithm {
    /// Run this algorithm against `entry` at time `now` (epoch ms).
    pub fn apply(self, entry: &mut Entry, rule: &Rule, now: u64) -> AdmissionResult {
        entry.adopt(rule);
        match self {
            Algorithm::SlidingWindow => sliding_window::check(entry, rule, now),
            Algorithm::TokenBucket => token_bucket::check(entry, rule, now),
            Algorithm::FixedWindow => fixed_window::check(entry, rule, now),
        }
    }
}
