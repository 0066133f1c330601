//! Token bucket.
//!
//! The bucket holds up to `burst_size` tokens and earns `refill_rate` tokens
//! per window, continuously. Each granted request spends one token, so short
//! bursts are allowed while the long-run rate stays bounded.

use crate::admission::entry::Entry;
use crate::admission::result::AdmissionResult;
use crate::admission::rules::Rule;

pub fn check(entry: &mut Entry, rule: &Rule, now: u64) -> AdmissionResult {
    let capacity = rule.burst_size() as f64;
    let refill_rate = rule.refill_rate() as f64;
    let window = rule.window_ms as f64;

    // A new bucket starts full.
    let (tokens, last_refill) = match (entry.tokens, entry.last_refill) {
        (Some(tokens), Some(last_refill)) => (tokens, last_refill),
        _ => (capacity, now),
    };

    let elapsed = now.saturating_sub(last_refill) as f64;
    let mut tokens = (tokens + elapsed * refill_rate / window).min(capacity);

    let success = tokens >= 1.0;
    if success {
        tokens -= 1.0;
    }

    // The refill up to `now` is folded into the balance either way.
    entry.tokens = Some(tokens);
    entry.last_refill = Some(now.max(last_refill));

    let remaining = tokens.floor() as u64;
    let reset_time = now + rule.window_ms;

    if success {
        AdmissionResult::allowed(rule.burst_size(), remaining, reset_time)
    } else {
        let per_token_ms = rule.window_ms.div_ceil(rule.refill_rate());
        AdmissionResult::denied(rule.burst_size(), remaining, reset_time, per_token_ms)
    }
}
