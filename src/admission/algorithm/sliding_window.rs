//! Sliding window log.
//!
//! Keeps the timestamp of every granted request and counts those within the
//! window ending now. Precise, at the cost of one timestamp per request.

use crate::admission::entry::Entry;
use crate::admission::result::AdmissionResult;
use crate::admission::rules::Rule;

pub fn check(entry: &mut Entry, rule: &Rule, now: u64) -> AdmissionResult {
    let window = rule.window_ms;

    // Keep only timestamps strictly inside (now - window, now].
    entry
        .request_timestamps
        .retain(|&t| t.saturating_add(window) > now);

    entry.request_timestamps.push_back(now);
    let count = entry.request_timestamps.len() as u64;
    let success = count <= rule.max_requests;

    if !success {
        // A denied attempt does not consume quota.
        entry.request_timestamps.pop_back();
    }

    let remaining = rule.max_requests.saturating_sub(count);
    let oldest = entry.request_timestamps.front().copied().unwrap_or(now);
    let reset_time = oldest + window;

    if success {
        AdmissionResult::allowed(rule.max_requests, remaining, reset_time)
    } else {
        AdmissionResult::denied(rule.max_requests, remaining, reset_time, reset_time - now)
    }
}
