//! Fixed window counter.
//!
//! Windows are aligned to multiples of `window_ms`. Cheap, but up to twice
//! the limit can pass around a window boundary.

use crate::admission::entry::Entry;
use crate::admission::result::AdmissionResult;
use crate::admission::rules::Rule;

pub fn check(entry: &mut Entry, rule: &Rule, now: u64) -> AdmissionResult {
    let window = rule.window_ms;
    let current_window_start = now / window * window;

    if entry.window_start != Some(current_window_start) {
        entry.window_start = Some(current_window_start);
        entry.request_timestamps.clear();
    }

    let success = (entry.request_timestamps.len() as u64) < rule.max_requests;
    if success {
        entry.request_timestamps.push_back(now);
    }

    let used = entry.request_timestamps.len() as u64;
    let remaining = rule.max_requests.saturating_sub(used);
    let reset_time = current_window_start + window;

    if success {
        AdmissionResult::allowed(rule.max_requests, remaining, reset_time)
    } else {
        AdmissionResult::denied(rule.max_requests, remaining, reset_time, reset_time - now)
    }
}
