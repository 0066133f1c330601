//! Content signal patterns.
//!
//! Pre-compiled regex families scored by the classifier. Strong signals are
//! worth two points per match, soft signals one.

use once_cell::sync::Lazy;
use regex::Regex;

/// Points per match for unambiguous signals.
pub const STRONG: u32 = 2;
/// Points per match for soft signals.
pub const SOFT: u32 = 1;

/// One scored regex family.
pub struct SignalPattern {
    /// Human-readable reason reported when the family matches
    pub label: &'static str,
    /// Points per match
    pub weight: u32,
    regex: Regex,
}

impl SignalPattern {
    fn new(label: &'static str, weight: u32, pattern: &str) -> Self {
        let regex = Regex::new(pattern).unwrap_or_else(|e| {
            tracing::error!(label = label, "Failed to compile signal pattern: {}", e);
            // [^\s\S] matches nothing
            Regex::new(r"[^\s\S]").unwrap()
        });
        Self { label, weight, regex }
    }

    /// Number of non-overlapping matches in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.regex.find_iter(text).count()
    }
}

/// Characters whose long runs (ten or more in a row) are scored as filler.
const RUN_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789!?.*$#=~_-";
const MIN_RUN: usize = 10;

/// `a{10,}|b{10,}|...`, one branch per character, since `regex` has no backreferences.
fn repeated_char_pattern() -> String {
    let branches: Vec<String> = RUN_CHARS
        .chars()
        .map(|c| format!("{}{{{},}}", regex::escape(&c.to_string()), MIN_RUN))
        .collect();
    format!("(?i){}", branches.join("|"))
}

/// All families in scoring order: strong first, then soft.
pub static SIGNAL_PATTERNS: Lazy<Vec<SignalPattern>> = Lazy::new(|| {
    vec![
        SignalPattern::new(
            "Promotional language",
            STRONG,
            r"(?i)\b(?:buy now|click here|free money|limited time(?: offer)?|act now|100% free|make money fast|risk[- ]free|you(?:'ve| have) won|claim your (?:prize|reward))",
        ),
        SignalPattern::new(
            "Suspicious markup or event handler",
            STRONG,
            r"(?i)<\s*(?:script|iframe|object|embed)\b|javascript\s*:|\bon(?:load|error|click|dblclick|mouse\w+|key\w+|focus|blur|submit|change|input)\s*=",
        ),
        SignalPattern::new(
            "Encoded script tag",
            STRONG,
            r"(?i)(?:&lt;|%3c|\\x3c|\\u003c|&#0*60;?|&#x0*3c;?)\s*/?\s*script",
        ),
        SignalPattern::new(
            "Template injection syntax",
            STRONG,
            r"\{\{[^}]*\}\}|\$\{[^}]*\}|<%[^%]*%>",
        ),
        SignalPattern::new(
            "Raw URL",
            STRONG,
            r#"(?i)\bhttps?://[^\s<>"']+|\bwww\.[^\s<>"']+"#,
        ),
        SignalPattern::new(
            "Phone number",
            SOFT,
            r"(?:\+\d{1,3}[\s.-]?)?\(?\b\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b",
        ),
        SignalPattern::new(
            "Email address",
            SOFT,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        ),
        SignalPattern::new("Excessive punctuation", SOFT, r"[!?]{3,}"),
        SignalPattern::new(
            "Excessive capitals",
            SOFT,
            r"\b[A-Z]{2,}(?:[\s,.!?]+[A-Z]{2,}){3,}\b",
        ),
        SignalPattern::new("Repeated characters", SOFT, &repeated_char_pattern()),
    ]
});
