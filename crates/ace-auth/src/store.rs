//! Key-value stores for session-scoped auth data
//!
//! `KeyValueStore` is the only persistence seam the flow uses. `NullStore`
//! keeps nothing (useful for stateless callers and tests); `SessionStore`
//! writes through to a browser `Session`, prefixing every key so several
//! libraries can share one session.

use std::time::Duration;

use serde_json::Value;

use crate::constants::{SESSION_COOKIE_EXPIRES_SECS, SESSION_PREFIX};
use crate::session::Session;

/// Named-value storage scoped to the current session.
///
/// Writes are fire-and-forget: implementations never fail.
pub trait KeyValueStore: Send + Sync {
    fn set(&self, key: &str, value: Value);

    /// Stored value for `key`, or `default` when there is none.
    fn get(&self, key: &str, default: Option<Value>) -> Option<Value>;

    fn delete(&self, key: &str);
}

/// Store that discards writes and always answers with the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl KeyValueStore for NullStore {
    fn set(&self, _key: &str, _value: Value) {}

    fn get(&self, _key: &str, default: Option<Value>) -> Option<Value> {
        default
    }

    fn delete(&self, _key: &str) {}
}

/// Store backed by a browser session.
///
/// Every access opens the session first, so a fresh `Session` handle can be
/// passed in before anything has touched it.
#[derive(Debug, Clone)]
pub struct SessionStore {
    session: Session,
    prefix: String,
    cookie_expires: Option<Duration>,
}

impl SessionStore {
    /// `cookie_expires` is applied when this store opens the session.
    pub fn new(session: Session, prefix: impl Into<String>, cookie_expires: Option<Duration>) -> Self {
        Self {
            session,
            prefix: prefix.into(),
            cookie_expires,
        }
    }

    /// Store with the default `ace_auth` prefix and 7-day lifetime.
    pub fn with_defaults(session: Session) -> Self {
        Self::new(
            session,
            SESSION_PREFIX,
            Some(Duration::from_secs(SESSION_COOKIE_EXPIRES_SECS)),
        )
    }

    /// Full session key for `key`: `{prefix}_{key}`, or `key` with no prefix.
    pub fn key_name(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}_{key}", self.prefix)
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl KeyValueStore for SessionStore {
    fn set(&self, key: &str, value: Value) {
        let name = self.key_name(key);
        self.session.open(self.cookie_expires).insert(name, value);
    }

    fn get(&self, key: &str, default: Option<Value>) -> Option<Value> {
        let name = self.key_name(key);
        self.session
            .open(self.cookie_expires)
            .get(&name)
            .cloned()
            .or(default)
    }

    fn delete(&self, key: &str) {
        let name = self.key_name(key);
        self.session.open(self.cookie_expires).remove(&name);
    }
}
