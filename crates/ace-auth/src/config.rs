//! Flow configuration
//!
//! `AuthFlowConfig` deserializes from the `[auth]` table of a service config.
//! The client secret is never read from that table: callers supply it
//! separately (env var or secret file) so it cannot leak through config dumps.

use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_RESPONSE_TYPE, SESSION_COOKIE_EXPIRES_SECS, SESSION_PREFIX};
use crate::error::{Error, Result};

/// How the authorization server delivers the callback parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// `code`/`state` arrive in the query string
    #[default]
    Query,
    /// `code`/`state` arrive as url-encoded body fields
    FormPost,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Query => "query",
            ResponseMode::FormPost => "form_post",
        }
    }
}

/// Identity slots the flow keeps in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSlot {
    AccessToken,
    RefreshToken,
    IdToken,
    User,
}

impl SessionSlot {
    /// Unprefixed store key.
    pub fn key(&self) -> &'static str {
        match self {
            SessionSlot::AccessToken => "access_token",
            SessionSlot::RefreshToken => "refresh_token",
            SessionSlot::IdToken => "id_token",
            SessionSlot::User => "user",
        }
    }
}

fn default_persistence() -> Vec<SessionSlot> {
    vec![
        SessionSlot::RefreshToken,
        SessionSlot::User,
        SessionSlot::AccessToken,
    ]
}

fn default_response_type() -> String {
    DEFAULT_RESPONSE_TYPE.to_string()
}

fn default_prefix() -> String {
    SESSION_PREFIX.to_string()
}

fn default_cookie_expires() -> u64 {
    SESSION_COOKIE_EXPIRES_SECS
}

/// Session key layout and lifetime.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Session lifetime applied when the session is first opened; 0 disables it
    #[serde(default = "default_cookie_expires")]
    pub cookie_expires_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            cookie_expires_secs: default_cookie_expires(),
        }
    }
}

impl SessionSettings {
    pub fn cookie_expires(&self) -> Option<Duration> {
        (self.cookie_expires_secs > 0).then(|| Duration::from_secs(self.cookie_expires_secs))
    }
}

/// Configuration for one registered application.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthFlowConfig {
    /// Authorization server base URL, e.g. `https://auth.example.com`
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_response_type")]
    pub response_type: String,
    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default)]
    pub scope: Option<String>,
    /// Slots written through to the session store
    #[serde(default = "default_persistence")]
    pub persist: Vec<SessionSlot>,
    #[serde(default)]
    pub session: SessionSettings,
}

impl AuthFlowConfig {
    /// Config with the four required fields and defaults for the rest.
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<Secret<String>>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
            redirect_uri: redirect_uri.into(),
            response_type: default_response_type(),
            response_mode: ResponseMode::default(),
            scope: None,
            persist: default_persistence(),
            session: SessionSettings::default(),
        }
    }

    pub fn with_client_secret(mut self, client_secret: impl Into<Secret<String>>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_response_type(mut self, response_type: impl Into<String>) -> Self {
        self.response_type = response_type.into();
        self
    }

    pub fn with_response_mode(mut self, response_mode: ResponseMode) -> Self {
        self.response_mode = response_mode;
        self
    }

    pub fn with_persistence(mut self, slots: impl IntoIterator<Item = SessionSlot>) -> Self {
        self.persist = slots.into_iter().collect();
        self
    }

    pub fn with_session(mut self, session: SessionSettings) -> Self {
        self.session = session;
        self
    }

    /// Whether `slot` is written through to the session store.
    pub fn persists(&self, slot: SessionSlot) -> bool {
        self.persist.contains(&slot)
    }

    /// Check the required fields, in the order domain, client_id,
    /// client_secret, redirect_uri.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(Error::Config("Invalid domain".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("Invalid client_id".into()));
        }
        self.required_secret()?;
        if self.redirect_uri.trim().is_empty() {
            return Err(Error::Config("Invalid redirect_uri".into()));
        }
        Ok(())
    }

    pub(crate) fn required_secret(&self) -> Result<Secret<String>> {
        match &self.client_secret {
            Some(secret) if !secret.is_blank() => Ok(secret.clone()),
            _ => Err(Error::Config("Invalid client_secret".into())),
        }
    }
}
