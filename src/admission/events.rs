//! Structured admission events.
//!
//! Decisions and spam flags are reported to an [`AdmissionEvents`] sink.
//! Denials are security events, not application errors; the default sink
//! writes them to `tracing` at `warn`.

use serde::Serialize;
use tracing::{debug, warn};

use super::key::Context;
use super::result::AdmissionResult;
use super::rules::Action;

/// Payload of a spam flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpamFlag {
    /// Leading slice of the flagged content
    pub content_preview: String,
    pub context: Context,
    pub score: u32,
    pub confidence: u8,
    pub reasons: Vec<String>,
}

/// Receiver of admission events.
pub trait AdmissionEvents: Send + Sync {
    /// A check was granted.
    fn record_allowed(&self, action: Action, context: &Context, result: &AdmissionResult);

    /// A check was denied.
    fn record_denied(&self, action: Action, context: &Context, result: &AdmissionResult);

    /// Content was classified as spam.
    fn record_spam_flag(&self, flag: &SpamFlag);
}

/// Default sink that writes every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl AdmissionEvents for TracingEvents {
    fn record_allowed(&self, action: Action, context: &Context, result: &AdmissionResult) {
        debug!(
            target: "turnstile::admission",
            action = %action,
            user_id = ?context.user_id,
            ip_address = ?context.ip_address,
            resource = ?context.resource,
            remaining = result.remaining,
            limit = result.limit,
            "Admission granted"
        );
    }

    fn record_denied(&self, action: Action, context: &Context, result: &AdmissionResult) {
        warn!(
            target: "turnstile::admission",
            action = %action,
            user_id = ?context.user_id,
            ip_address = ?context.ip_address,
            resource = ?context.resource,
            limit = result.limit,
            remaining = result.remaining,
            retry_after = ?result.retry_after,
            reason = ?result.reason,
            "Admission denied"
        );
    }

    fn record_spam_flag(&self, flag: &SpamFlag) {
        warn!(
            target: "turnstile::spam",
            user_id = ?flag.context.user_id,
            ip_address = ?flag.context.ip_address,
            score = flag.score,
            confidence = flag.confidence,
            reasons = ?flag.reasons,
            preview = %flag.content_preview,
            "Content flagged as spam"
        );
    }
}
