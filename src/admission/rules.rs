//! Admission rules: the typed action set and its per-action policies.
//!
//! Rules are loaded once (built-in defaults, optionally extended from a YAML
//! file) and validated up front, so an unknown action name or a nonsensical
//! limit is caught at startup instead of on the first request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use super::key::Context;
use crate::error::{AdmissionError, Result};

/// Derives a custom key from the caller context, replacing default composition.
pub type KeyFn = Arc<dyn Fn(&Context) -> String + Send + Sync>;

/// The closed set of operation classes subject to admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "auth:login")]
    Login,
    #[serde(rename = "auth:register")]
    Register,
    #[serde(rename = "auth:password-reset")]
    PasswordReset,
    #[serde(rename = "message:send")]
    MessageSend,
    #[serde(rename = "file:upload")]
    FileUpload,
    #[serde(rename = "channel:create")]
    ChannelCreate,
    #[serde(rename = "api:call")]
    ApiCall,
    #[serde(rename = "search:query")]
    SearchQuery,
}

impl Action {
    /// Every known action, in declaration order.
    pub const ALL: [Action; 8] = [
        Action::Login,
        Action::Register,
        Action::PasswordReset,
        Action::MessageSend,
        Action::FileUpload,
        Action::ChannelCreate,
        Action::ApiCall,
        Action::SearchQuery,
    ];

    /// The wire name, e.g. `message:send`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Login => "auth:login",
            Action::Register => "auth:register",
            Action::PasswordReset => "auth:password-reset",
            Action::MessageSend => "message:send",
            Action::FileUpload => "file:upload",
            Action::ChannelCreate => "channel:create",
            Action::ApiCall => "api:call",
            Action::SearchQuery => "search:query",
        }
    }

    /// Whether granted checks of this action count towards a caller's
    /// recent-activity velocity.
    pub fn tracks_activity(&self) -> bool {
        matches!(self, Action::MessageSend)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| AdmissionError::Configuration(format!("unknown action '{}'", s)))
    }
}

/// Which counting algorithm a rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    SlidingWindow,
    TokenBucket,
    FixedWindow,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::SlidingWindow => "sliding-window",
            Algorithm::TokenBucket => "token-bucket",
            Algorithm::FixedWindow => "fixed-window",
        };
        f.write_str(name)
    }
}

/// The policy applied to one action.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Counting algorithm
    pub algorithm: Algorithm,
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Token bucket capacity; defaults to `max_requests`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<u64>,
    /// Tokens earned per window; defaults to `max_requests`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate: Option<u64>,
    /// Custom key derivation
    #[serde(skip)]
    pub key_fn: Option<KeyFn>,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("algorithm", &self.algorithm)
            .field("max_requests", &self.max_requests)
            .field("window_ms", &self.window_ms)
            .field("burst_size", &self.burst_size)
            .field("refill_rate", &self.refill_rate)
            .field("key_fn", &self.key_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Rule {
    pub fn sliding_window(max_requests: u64, window_ms: u64) -> Self {
        Self::new(Algorithm::SlidingWindow, max_requests, window_ms)
    }

    pub fn fixed_window(max_requests: u64, window_ms: u64) -> Self {
        Self::new(Algorithm::FixedWindow, max_requests, window_ms)
    }

    pub fn token_bucket(max_requests: u64, window_ms: u64, burst_size: u64, refill_rate: u64) -> Self {
        Self {
            burst_size: Some(burst_size),
            refill_rate: Some(refill_rate),
            ..Self::new(Algorithm::TokenBucket, max_requests, window_ms)
        }
    }

    fn new(algorithm: Algorithm, max_requests: u64, window_ms: u64) -> Self {
        Self {
            algorithm,
            max_requests,
            window_ms,
            burst_size: None,
            refill_rate: None,
            key_fn: None,
        }
    }

    /// Attach a custom key function.
    pub fn with_key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(f));
        self
    }

    /// Effective bucket capacity.
    pub fn burst_size(&self) -> u64 {
        self.burst_size.unwrap_or(self.max_requests)
    }

    /// Effective tokens earned per window.
    pub fn refill_rate(&self) -> u64 {
        self.refill_rate.unwrap_or(self.max_requests)
    }

    /// Reject rules that could never admit anything or would divide by zero.
    pub fn validate(&self, action: &str) -> Result<()> {
        if self.max_requests == 0 {
            return Err(AdmissionError::Configuration(format!(
                "rule for '{}': max_requests must be greater than 0",
                action
            )));
        }
        if self.window_ms == 0 {
            return Err(AdmissionError::Configuration(format!(
                "rule for '{}': window_ms must be greater than 0",
                action
            )));
        }
        if self.algorithm == Algorithm::TokenBucket && (self.burst_size() == 0 || self.refill_rate() == 0) {
            return Err(AdmissionError::Configuration(format!(
                "rule for '{}': token bucket needs a non-zero burst_size and refill_rate",
                action
            )));
        }
        Ok(())
    }
}

/// Per-call adjustments merged over an action's base rule.
#[derive(Clone, Default)]
pub struct ConfigOverride {
    pub algorithm: Option<Algorithm>,
    pub max_requests: Option<u64>,
    pub window_ms: Option<u64>,
    pub burst_size: Option<u64>,
    pub refill_rate: Option<u64>,
    pub key_fn: Option<KeyFn>,
}

impl fmt::Debug for ConfigOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOverride")
            .field("algorithm", &self.algorithm)
            .field("max_requests", &self.max_requests)
            .field("window_ms", &self.window_ms)
            .field("burst_size", &self.burst_size)
            .field("refill_rate", &self.refill_rate)
            .field("key_fn", &self.key_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl ConfigOverride {
    /// Merge onto `base`; set fields win.
    pub fn apply(&self, base: &Rule) -> Rule {
        Rule {
            algorithm: self.algorithm.unwrap_or(base.algorithm),
            max_requests: self.max_requests.unwrap_or(base.max_requests),
            window_ms: self.window_ms.unwrap_or(base.window_ms),
            burst_size: self.burst_size.or(base.burst_size),
            refill_rate: self.refill_rate.or(base.refill_rate),
            key_fn: self.key_fn.clone().or_else(|| base.key_fn.clone()),
        }
    }

    /// Build a full rule from the override alone, when it is complete enough.
    pub fn to_rule(&self) -> Option<Rule> {
        Some(Rule {
            algorithm: self.algorithm?,
            max_requests: self.max_requests?,
            window_ms: self.window_ms?,
            burst_size: self.burst_size,
            refill_rate: self.refill_rate,
            key_fn: self.key_fn.clone(),
        })
    }
}

/// The action → rule table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: HashMap<Action, Rule>,
}

impl RuleSet {
    /// An empty table; every check fails until rules are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in policy table.
    pub fn defaults() -> Self {
        let mut rules = HashMap::new();
        rules.insert(Action::Login, Rule::sliding_window(5, 15 * 60_000));
        rules.insert(Action::Register, Rule::fixed_window(5, 3_600_000));
        rules.insert(Action::PasswordReset, Rule::sliding_window(3, 3_600_000));
        rules.insert(Action::MessageSend, Rule::sliding_window(30, 60_000));
        rules.insert(Action::FileUpload, Rule::sliding_window(10, 60_000));
        rules.insert(Action::ChannelCreate, Rule::fixed_window(10, 3_600_000));
        rules.insert(Action::ApiCall, Rule::token_bucket(100, 60_000, 20, 100));
        rules.insert(Action::SearchQuery, Rule::token_bucket(30, 60_000, 10, 30));
        Self { rules }
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading admission rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    ///
    /// Accepts either a bare `action: rule` map or the same map nested under
    /// a top-level `rules:` key.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let nested = value
            .as_mapping()
            .map_or(false, |map| map.contains_key("rules"));

        let set = if value.is_null() {
            RuleSet::new()
        } else if nested {
            serde_yaml::from_value::<RuleSet>(value)?
        } else {
            RuleSet {
                rules: serde_yaml::from_value(value)?,
            }
        };
        set.validate()?;
        Ok(set)
    }

    /// Check every rule in the table.
    pub fn validate(&self) -> Result<()> {
        for (action, rule) in &self.rules {
            rule.validate(action.as_str())?;
        }
        Ok(())
    }

    /// Replace or add a single rule.
    pub fn insert(&mut self, action: Action, rule: Rule) -> Result<()> {
        rule.validate(action.as_str())?;
        self.rules.insert(action, rule);
        Ok(())
    }

    /// Layer `other` on top of this table, rule by rule.
    pub fn extend(&mut self, other: RuleSet) {
        self.rules.extend(other.rules);
    }

    pub fn get(&self, action: Action) -> Option<&Rule> {
        self.rules.get(&action)
    }

    /// Resolve the effective rule for one check.
    pub fn resolve(&self, action: Action, overrides: Option<&ConfigOverride>) -> Result<Rule> {
        let rule = match (self.rules.get(&action), overrides) {
            (Some(base), Some(o)) => o.apply(base),
            (Some(base), None) => base.clone(),
            (None, Some(o)) => o.to_rule().ok_or_else(|| {
                AdmissionError::Configuration(format!(
                    "no rule registered for '{}' and the override is incomplete",
                    action
                ))
            })?,
            (None, None) => {
                return Err(AdmissionError::Configuration(format!(
                    "no rule registered for '{}'",
                    action
                )))
            }
        };
        rule.validate(action.as_str())?;
        Ok(rule)
    }

    /// Serialize the table as YAML, sorted by action name.
    pub fn to_yaml(&self) -> Result<String> {
        let sorted: std::collections::BTreeMap<&str, &Rule> =
            self.rules.iter().map(|(a, r)| (a.as_str(), r)).collect();
        Ok(serde_yaml::to_string(&sorted)?)
    }
}
