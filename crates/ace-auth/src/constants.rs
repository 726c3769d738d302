//! Authorization-server paths and session defaults
//!
//! Paths are relative to the configured domain. The session names match the
//! layout existing deployments already have in their session stores, so they
//! must not change.

/// Authorization endpoint (browser redirect target)
pub const AUTHORIZE_PATH: &str = "oauth/authorize";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_PATH: &str = "oauth/token";

/// Profile endpoint, called with the access token as bearer credential
pub const USERINFO_PATH: &str = "api/user";

/// Logout endpoint (browser redirect target)
pub const LOGOUT_PATH: &str = "auth_logout";

/// Default prefix for every session key (`ace_auth_access_token`, ...)
pub const SESSION_PREFIX: &str = "ace_auth";

/// Default session cookie lifetime in seconds (7 days)
pub const SESSION_COOKIE_EXPIRES_SECS: u64 = 604_800;

/// Session slot holding the pending CSRF state token
pub const STATE_KEY: &str = "web_auth_state";

pub const DEFAULT_RESPONSE_TYPE: &str = "code";

/// Token option sent as the `Auth0-Forwarded-For` header instead of body data
pub const FORWARDED_FOR_OPTION: &str = "auth0_forwarded_for";

/// `code` value in the userinfo envelope that marks a successful lookup
pub const USERINFO_SUCCESS_CODE: i64 = 200;
