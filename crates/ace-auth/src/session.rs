//! Browser-session record shared by the stores of one request
//!
//! A `Session` is a cheap handle to one shared record of JSON values. The
//! record is not usable until it has been opened; `open` is the explicit
//! "ensure the session is started" step, it is idempotent, and the first call
//! fixes the session's lifetime. Stores call it on every access, so nothing
//! depends on initialization order.
//!
//! Handles are `Send + Sync`, but two requests writing the same session at
//! once is last-writer-wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

#[derive(Debug, Default)]
struct SessionRecord {
    values: HashMap<String, Value>,
    opened_at: Option<Instant>,
    lifetime: Option<Duration>,
}

/// Handle to one browser session.
#[derive(Debug, Clone)]
pub struct Session {
    id: Arc<str>,
    record: Arc<Mutex<SessionRecord>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an unopened session with a random id.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().as_simple().to_string())
    }

    /// Create an unopened session with a caller-chosen id (e.g. from a cookie).
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Arc::from(id.into()),
            record: Arc::new(Mutex::new(SessionRecord::default())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open the session if needed and return a guard over its values.
    ///
    /// `lifetime` only takes effect on the call that actually opens the
    /// session; `None` means the session lives until it is discarded.
    pub fn open(&self, lifetime: Option<Duration>) -> SessionGuard<'_> {
        let mut record = self.lock();
        if record.opened_at.is_none() {
            record.opened_at = Some(Instant::now());
            record.lifetime = lifetime;
            debug!(
                session_id = %self.id,
                ?lifetime,
                "session opened"
            );
        }
        SessionGuard(record)
    }

    pub fn is_open(&self) -> bool {
        self.lock().opened_at.is_some()
    }

    /// Lifetime fixed when the session was opened.
    pub fn lifetime(&self) -> Option<Duration> {
        self.lock().lifetime
    }

    /// When an opened session with a lifetime runs out.
    pub fn expires_at(&self) -> Option<Instant> {
        let record = self.lock();
        record
            .opened_at
            .zip(record.lifetime)
            .map(|(opened_at, lifetime)| opened_at + lifetime)
    }

    /// Whether an opened session has outlived its lifetime.
    pub fn is_expired(&self) -> bool {
        self.expires_at()
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    /// Copy of the raw values, keyed by their full (prefixed) names.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock().values.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SessionRecord> {
        // A panic while holding the lock cannot leave the map half-written
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Access to an opened session's values.
pub struct SessionGuard<'a>(MutexGuard<'a, SessionRecord>);

impl SessionGuard<'_> {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.values.get(key)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.0.values.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.values.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_session_is_unopened() {
        let session = Session::new();
        assert!(!session.is_open());
        assert!(!session.is_expired());
        assert!(session.snapshot().is_empty());
        assert_eq!(session.id().len(), 32);
    }

    #[test]
    fn first_open_fixes_lifetime() {
        let session = Session::with_id("sid-1");
        session.open(Some(Duration::from_secs(60)));
        session.open(Some(Duration::from_secs(5)));
        assert!(session.is_open());
        assert_eq!(session.lifetime(), Some(Duration::from_secs(60)));
        assert!(session.expires_at().unwrap() > Instant::now());
        assert_eq!(session.id(), "sid-1");
    }

    #[test]
    fn clones_share_values() {
        let session = Session::new();
        let other = session.clone();
        session.open(None).insert("k".into(), json!("v"));
        assert_eq!(other.open(None).get("k"), Some(&json!("v")));
        assert_eq!(other.open(None).remove("k"), Some(json!("v")));
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn zero_lifetime_expires_immediately() {
        let session = Session::new();
        session.open(Some(Duration::ZERO));
        assert!(session.is_expired());
    }

    #[test]
    fn no_lifetime_never_expires() {
        let session = Session::new();
        session.open(None);
        assert!(!session.is_expired());
        assert_eq!(session.lifetime(), None);
        assert_eq!(session.expires_at(), None);
    }
}
