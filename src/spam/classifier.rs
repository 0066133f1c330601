//! Heuristic spam scoring.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use super::patterns::SIGNAL_PATTERNS;
use crate::admission::Context;
use crate::config::SpamSettings;

/// Answers "how much has this user been posting lately?".
pub trait ActivitySource: Send + Sync {
    /// Recent activity-tracking requests by `user_id` within `window_ms`.
    fn recent_activity(&self, user_id: &str, window_ms: u64) -> usize;
}

/// Classification outcome. Reasons are always reported, spam or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpamVerdict {
    pub is_spam: bool,
    /// 0..=100
    pub confidence: u8,
    /// Raw accumulated points
    pub score: u32,
    pub reasons: Vec<String>,
}

/// Scores free text against independent weighted signals.
///
/// Holds no per-call state; the same content and context always give the
/// same verdict for a given activity history.
#[derive(Clone)]
pub struct SpamClassifier {
    settings: SpamSettings,
    activity: Option<Arc<dyn ActivitySource>>,
}

impl SpamClassifier {
    pub fn new(settings: SpamSettings) -> Self {
        Self {
            settings,
            activity: None,
        }
    }

    /// Consult `activity` for posting velocity when the context names a user.
    pub fn with_activity(mut self, activity: Arc<dyn ActivitySource>) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn settings(&self) -> &SpamSettings {
        &self.settings
    }

    pub fn classify(&self, content: &str, context: &Context) -> SpamVerdict {
        let mut score: u32 = 0;
        let mut reasons = Vec::new();

        for pattern in SIGNAL_PATTERNS.iter() {
            let matches = pattern.count(content);
            if matches > 0 {
                score += pattern.weight * matches as u32;
                reasons.push(format!("{} ({} found)", pattern.label, matches));
            }
        }

        if let Some((word, count)) = most_repeated_word(content) {
            if count > self.settings.repeated_word_threshold {
                score += count as u32;
                reasons.push(format!("Repeated word \"{}\" ({} times)", word, count));
            }
        }

        let length = content.chars().count();
        if length > self.settings.max_length {
            score += self.settings.length_points;
            reasons.push(format!("Excessive length ({} characters)", length));
        }

        if let (Some(user_id), Some(activity)) = (context.user_id.as_deref(), &self.activity) {
            let recent = activity.recent_activity(user_id, self.settings.velocity_window_ms());
            if recent > self.settings.velocity_threshold {
                score += recent as u32;
                reasons.push(format!(
                    "High posting velocity ({} messages in {}s)",
                    recent, self.settings.velocity_window_secs
                ));
            }
        }

        let confidence = (score.saturating_mul(10)).min(100) as u8;
        let is_spam = score >= self.settings.threshold;

        trace!(score = score, confidence = confidence, is_spam = is_spam, "Content classified");

        SpamVerdict {
            is_spam,
            confidence,
            score,
            reasons,
        }
    }

    /// The first `preview_chars` characters of `content`.
    pub fn preview(&self, content: &str) -> String {
        content.chars().take(self.settings.preview_chars).collect()
    }
}

impl Default for SpamClassifier {
    fn default() -> Self {
        Self::new(SpamSettings::default())
    }
}

/// The most frequent whitespace-separated word, case-insensitively.
/// Ties go to the alphabetically first word.
fn most_repeated_word(content: &str) -> Option<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for word in content.split_whitespace() {
        *counts.entry(word.to_lowercase()).or_default() += 1;
    }

    let mut best: Option<(String, usize)> = None;
    for (word, count) in counts {
        if best.as_ref().map_or(true, |(_, c)| count > *c) {
            best = Some((word, count));
        }
    }
    best
}
