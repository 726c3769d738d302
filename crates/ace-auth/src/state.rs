//! CSRF state tokens for the authorization redirect
//!
//! One state value is pending per session at a time. Issuing or storing a new
//! value replaces the pending one, and validation always consumes it, whether
//! or not the supplied value matched. A state can therefore be redeemed at
//! most once.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::STATE_KEY;
use crate::store::KeyValueStore;

/// Number of random bytes in a generated state token.
const STATE_BYTES: usize = 32;

/// Lifecycle of the pending state token.
pub trait StateHandler: Send + Sync {
    /// Generate, store and return a fresh token.
    fn issue(&self) -> String;

    /// Store a caller-supplied token as the pending one.
    fn store(&self, state: &str);

    /// Compare `state` with the pending token and clear it.
    fn validate(&self, state: Option<&str>) -> bool;
}

/// Generate an unguessable state token (URL-safe base64, no padding).
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `StateHandler` that keeps the pending token in a `KeyValueStore`.
#[derive(Debug, Clone)]
pub struct SessionStateHandler<S> {
    backend: S,
}

impl<S: KeyValueStore> SessionStateHandler<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }
}

impl<S: KeyValueStore> StateHandler for SessionStateHandler<S> {
    fn issue(&self) -> String {
        let state = generate_state();
        self.store(&state);
        state
    }

    fn store(&self, state: &str) {
        self.backend.set(STATE_KEY, Value::String(state.to_string()));
        debug!("state token stored");
    }

    fn validate(&self, state: Option<&str>) -> bool {
        let pending = self.backend.get(STATE_KEY, None);
        self.backend.delete(STATE_KEY);

        let valid = match (pending.as_ref().and_then(Value::as_str), state) {
            (Some(pending), Some(supplied)) => pending == supplied,
            _ => false,
        };
        if valid {
            debug!("state token validated");
        } else {
            warn!(
                pending = pending.is_some(),
                supplied = state.is_some(),
                "state token rejected"
            );
        }
        valid
    }
}
