//! Caller context and admission key composition.

use serde::{Deserialize, Serialize};

use super::rules::{Action, Rule};

/// Identity fragments describing who is asking.
///
/// The identity provider fills these in; the engine treats every value as an
/// opaque string and never mutates the context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Further discriminator, e.g. a channel id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// A key that uniquely identifies one caller's state for one action.
///
/// The action is part of the key's identity, so two actions whose rules
/// produce the same key string still keep separate state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdmissionKey {
    action: Action,
    key: String,
}

impl AdmissionKey {
    pub fn new(action: Action, key: impl Into<String>) -> Self {
        Self {
            action,
            key: key.into(),
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for AdmissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Builds keys of the form `action[:user:<id>|:ip:<addr>|:session:<id>][:resource:<r>]`.
///
/// Each composer owns a session identifier used when the context carries
/// neither a user nor an address, so the identity fragment is never empty.
#[derive(Debug, Clone)]
pub struct KeyComposer {
    session_id: String,
}

impl KeyComposer {
    /// Create a composer with a fresh random session identifier.
    pub fn new() -> Self {
        Self::with_session(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Create a composer with a fixed session identifier.
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The identity fragment, without the action: `user:<id>`, `ip:<addr>` or `session:<id>`.
    pub fn identity(&self, context: &Context) -> String {
        if let Some(user) = context.user_id.as_deref() {
            format!("user:{}", user)
        } else if let Some(ip) = context.ip_address.as_deref() {
            format!("ip:{}", ip)
        } else {
            format!("session:{}", self.session_id)
        }
    }

    /// Compose the key for a check. A rule's `key_fn` replaces the default scheme.
    pub fn compose(&self, action: Action, rule: &Rule, context: &Context) -> AdmissionKey {
        if let Some(key_fn) = &rule.key_fn {
            return AdmissionKey::new(action, key_fn(context));
        }

        let mut key = format!("{}:{}", action, self.identity(context));
        if let Some(resource) = context.resource.as_deref() {
            key.push_str(":resource:");
            key.push_str(resource);
        }
        AdmissionKey::new(action, key)
    }
}

impl Default for KeyComposer {
    fn default() -> Self {
        Self::new()
    }
}
