//! The outcome of a single admission check.

use serde::Serialize;

/// Reason attached to every denial.
pub const RATE_LIMIT_EXCEEDED: &str = "Rate limit exceeded";

/// Decision returned to the caller of a check. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResult {
    /// Whether the request may proceed
    pub success: bool,
    /// Requests (or tokens) allowed by the policy
    pub limit: u64,
    /// Requests left before the next denial
    pub remaining: u64,
    /// Epoch milliseconds at which quota is next restored
    pub reset_time: u64,
    /// Whole seconds to wait; only set on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AdmissionResult {
    pub fn allowed(limit: u64, remaining: u64, reset_time: u64) -> Self {
        Self {
            success: true,
            limit,
            remaining,
            reset_time,
            retry_after: None,
            reason: None,
        }
    }

    /// A denial; `retry_after_ms` is rounded up to whole seconds.
    pub fn denied(limit: u64, remaining: u64, reset_time: u64, retry_after_ms: u64) -> Self {
        Self {
            success: false,
            limit,
            remaining,
            reset_time,
            retry_after: Some(retry_after_ms.div_ceil(1000)),
            reason: Some(RATE_LIMIT_EXCEEDED.to_string()),
        }
    }

    /// The result handed out while admission control is switched off.
    pub fn unlimited(now: u64) -> Self {
        Self::allowed(u64::MAX, u64::MAX, now)
    }

    /// Whether this result carries the "no limit" sentinel.
    pub fn is_unlimited(&self) -> bool {
        self.limit == u64::MAX
    }
}
