//! In-memory browser session registry
//!
//! Maps the `ace_auth_sid` cookie to a `Session`. Only `/login` registers new
//! sessions; every other route looks up an existing one. Expired entries are
//! pruned on each lookup. A full registry evicts the session closest to
//! expiry, counting sessions that were never opened as the oldest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ace_auth::Session;
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "ace_auth_sid";

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    max_age: Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_age: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            max_age,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Registered session named by the request's cookie.
    pub async fn find(&self, headers: &HeaderMap) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        prune(&mut sessions);
        session_id(headers).and_then(|id| sessions.get(id).cloned())
    }

    /// Session named by the request's cookie, or a newly registered one.
    pub async fn resolve(&self, headers: &HeaderMap) -> Session {
        let mut sessions = self.sessions.lock().await;
        prune(&mut sessions);

        if let Some(session) = session_id(headers).and_then(|id| sessions.get(id)) {
            return session.clone();
        }

        if sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, session)| session.expires_at())
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                sessions.remove(&id);
                warn!(max_sessions = self.max_sessions, "session registry full, evicted oldest");
            }
        }

        let session = Session::new();
        sessions.insert(session.id().to_string(), session.clone());
        debug!(active = sessions.len(), "created session");
        session
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// `Set-Cookie` value binding the browser to `session`.
    pub fn cookie(&self, session: &Session) -> String {
        format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            session.id(),
            self.max_age.as_secs()
        )
    }

    /// `Set-Cookie` value that deletes the session cookie.
    pub fn expired_cookie(&self) -> String {
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

fn prune(sessions: &mut HashMap<String, Session>) {
    let before = sessions.len();
    sessions.retain(|_, session| !session.is_expired());
    let pruned = before - sessions.len();
    if pruned > 0 {
        debug!(pruned, "pruned expired sessions");
    }
}

/// Session id from the `Cookie` headers, if present.
fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
        })
}
