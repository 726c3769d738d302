//! Authorization code flow client for AceAuth-style OAuth2/OIDC servers
//!
//! Provides the browser-side login flow (authorize redirect, CSRF state,
//! code exchange, profile lookup, token renewal, logout) on top of a small
//! fluent HTTP request builder. This crate has no web framework dependency:
//! the embedding service supplies the session and the callback parameters.
//!
//! Request flow:
//! 1. Service builds an `AuthFlow` per request from `AuthFlowConfig`, the
//!    user's `Session` and the request's `CallbackParams`
//! 2. `AuthFlow::start_login()` issues a state and returns the redirect
//! 3. On the callback, `AuthFlow::user()` validates the state, exchanges the
//!    code via `TokenClient` and stores the profile in the session
//! 4. `AuthFlow::renew_tokens()` refreshes an expiring access token
//! 5. `AuthFlow::logout()` clears the session slots

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod flow;
pub mod request;
pub mod session;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

pub use client::{Params, TokenClient, TokenOptions, TokenResponse};
pub use config::{AuthFlowConfig, ResponseMode, SessionSettings, SessionSlot};
pub use constants::*;
pub use error::{Error, Result};
pub use flow::{AuthFlow, CallbackParams, LoginRedirect};
pub use request::{ApiClient, ApiResponse, ParamValue, RequestBuilder, ReturnType};
pub use session::{Session, SessionGuard};
pub use state::{SessionStateHandler, StateHandler, generate_state};
pub use store::{KeyValueStore, NullStore, SessionStore};
