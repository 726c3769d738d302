//! Authorization code flow for one request
//!
//! An `AuthFlow` is built per inbound request, bound to that request's
//! callback parameters and to the user's session. It loads any identity the
//! session already holds, then drives the flow:
//!
//! 1. `start_login` / `build_login_url` issue (or store) a state token and
//!    produce the authorize redirect
//! 2. `complete_exchange` validates the callback state, exchanges the code,
//!    persists the tokens and fetches the user profile
//! 3. `renew_tokens` swaps the refresh token for a new access token
//! 4. `logout` clears everything the flow persisted
//!
//! Steps within a call run strictly in that order and nothing is rolled back
//! on failure: tokens persisted before a failing profile fetch stay in the
//! session, and the caller is expected to restart the login.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use transport::HttpTransport;

use crate::client::{Params, TokenClient, TokenOptions};
use crate::config::{AuthFlowConfig, ResponseMode, SessionSlot};
use crate::constants::USERINFO_SUCCESS_CODE;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::state::{SessionStateHandler, StateHandler};
use crate::store::{KeyValueStore, SessionStore};

/// Parameters of the inbound request: query string and url-encoded body.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    query: HashMap<String, String>,
    form: HashMap<String, String>,
}

impl CallbackParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(query: HashMap<String, String>, form: HashMap<String, String>) -> Self {
        Self { query, form }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(key.into(), value.into());
        self
    }

    /// Value of `key` where `mode` says the server puts it.
    pub fn param(&self, mode: ResponseMode, key: &str) -> Option<&str> {
        let source = match mode {
            ResponseMode::Query => &self.query,
            ResponseMode::FormPost => &self.form,
        };
        source.get(key).map(String::as_str)
    }
}

/// Redirect to the authorization server. The HTTP layer must answer the
/// current request with it and do nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    location: String,
}

impl LoginRedirect {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn into_location(self) -> String {
        self.location
    }
}

/// Session-scoped identity and the operations that change it.
pub struct AuthFlow {
    config: AuthFlowConfig,
    client: TokenClient,
    store: Box<dyn KeyValueStore>,
    state_handler: Box<dyn StateHandler>,
    callback: CallbackParams,
    user: Option<Value>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    /// Set once this request's authorization code has been taken up
    exchange_attempted: bool,
}

impl AuthFlow {
    /// Validate `config` and bind a flow to `session` and the request's
    /// `callback` parameters.
    ///
    /// Identity slots and the state token live in the same session, under the
    /// configured prefix.
    pub fn new(
        config: AuthFlowConfig,
        session: Session,
        callback: CallbackParams,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let client_secret = config.required_secret()?;

        let prefix = config.session.prefix.clone();
        let cookie_expires = config.session.cookie_expires();
        let store = SessionStore::new(session.clone(), prefix.clone(), cookie_expires);
        let state_store = SessionStore::new(session, prefix, cookie_expires);

        let client = TokenClient::new(
            config.domain.clone(),
            config.client_id.clone(),
            client_secret,
            transport,
        );

        let mut flow = Self {
            config,
            client,
            store: Box::new(store),
            state_handler: Box::new(SessionStateHandler::new(state_store)),
            callback,
            user: None,
            access_token: None,
            refresh_token: None,
            id_token: None,
            exchange_attempted: false,
        };
        flow.load_identity();
        Ok(flow)
    }

    /// Replace the identity store and reload identity from it.
    pub fn with_store(mut self, store: Box<dyn KeyValueStore>) -> Self {
        self.store = store;
        self.load_identity();
        self
    }

    pub fn with_state_handler(mut self, state_handler: Box<dyn StateHandler>) -> Self {
        self.state_handler = state_handler;
        self
    }

    pub fn config(&self) -> &AuthFlowConfig {
        &self.config
    }

    pub fn token_client(&self) -> &TokenClient {
        &self.client
    }

    fn load_identity(&mut self) {
        self.user = self
            .store
            .get(SessionSlot::User.key(), None)
            .filter(is_present);
        self.access_token = self.load_token(SessionSlot::AccessToken);
        self.refresh_token = self.load_token(SessionSlot::RefreshToken);
        self.id_token = self.load_token(SessionSlot::IdToken);
    }

    fn load_token(&self, slot: SessionSlot) -> Option<String> {
        self.store
            .get(slot.key(), None)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|t| !t.is_empty())
    }

    /// Build the login redirect and hand it to the HTTP layer.
    ///
    /// `state` and `connection` are added to `extra` when given (values in
    /// `extra` win). Consumes the flow: once the redirect is issued the
    /// request is over.
    pub fn start_login(
        self,
        state: Option<&str>,
        connection: Option<&str>,
        extra: Params,
    ) -> LoginRedirect {
        let mut params = Params::new();
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            params.insert("state".into(), state.into());
        }
        if let Some(connection) = connection.filter(|c| !c.is_empty()) {
            params.insert("connection".into(), connection.into());
        }
        params.extend(extra);

        let location = self.build_login_url(params);
        info!("redirecting to authorization server");
        LoginRedirect { location }
    }

    /// Authorize URL for this flow.
    ///
    /// Defaults (scope, response_type, response_mode, redirect_uri) are merged
    /// with `extra`, caller values winning, and empty values dropped. Without a
    /// `state` a fresh one is issued; a supplied state is stored so the
    /// callback can be validated against it.
    pub fn build_login_url(&self, extra: Params) -> String {
        let mut params = Params::new();
        if let Some(scope) = &self.config.scope {
            params.insert("scope".into(), scope.clone());
        }
        params.insert("response_type".into(), self.config.response_type.clone());
        params.insert(
            "response_mode".into(),
            self.config.response_mode.as_str().into(),
        );
        params.insert("redirect_uri".into(), self.config.redirect_uri.clone());
        params.extend(extra);
        params.retain(|_, v| !v.is_empty());

        match params.get("state") {
            Some(state) => self.state_handler.store(state),
            None => {
                let state = self.state_handler.issue();
                params.insert("state".into(), state);
            }
        }

        let response_type = params
            .get("response_type")
            .cloned()
            .unwrap_or_else(|| self.config.response_type.clone());
        let redirect_uri = params
            .get("redirect_uri")
            .cloned()
            .unwrap_or_else(|| self.config.redirect_uri.clone());

        self.client
            .authorize_url(&response_type, &redirect_uri, None, None, params)
    }

    /// Finish the login on a callback request.
    ///
    /// Returns `Ok(false)` when the request carries no authorization code, so
    /// it is safe to call on any request. Every other failure is an error.
    pub async fn complete_exchange(&mut self) -> Result<bool> {
        let mode = self.config.response_mode;
        let code = match self.callback.param(mode, "code").filter(|c| !c.is_empty()) {
            Some(code) => code.to_string(),
            None => return Ok(false),
        };
        self.exchange_attempted = true;

        let state = self.callback.param(mode, "state");
        if !self.state_handler.validate(state) {
            warn!("callback rejected: state mismatch");
            return Err(Error::Protocol("Invalid state".into()));
        }

        if self.user.is_some() {
            warn!("callback rejected: session already authenticated");
            return Err(Error::Protocol(
                "Can't initialize a new session while there is one active session already".into(),
            ));
        }

        let response = self
            .client
            .exchange_code(&code, &self.config.redirect_uri)
            .await?;

        let access_token = response
            .access_token()
            .ok_or_else(|| Error::Protocol("Invalid access_token - Retry login.".into()))?
            .to_string();
        self.set_access_token(access_token.clone());

        if let Some(refresh_token) = response.refresh_token() {
            self.set_refresh_token(refresh_token);
        }

        let profile = self.client.user_info(&access_token).await?;
        let code = profile.get("code").and_then(Value::as_i64);
        if code != Some(USERINFO_SUCCESS_CODE) {
            let message = profile
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("userinfo request failed")
                .to_string();
            warn!(?code, "userinfo lookup failed");
            return Err(Error::Protocol(message));
        }
        let user = profile
            .get("user")
            .cloned()
            .filter(is_present)
            .ok_or_else(|| Error::Protocol("userinfo response carried no user".into()))?;
        self.set_user(user);

        info!("authorization code exchanged, session authenticated");
        Ok(true)
    }

    /// Trade the refresh token for a new access token and id token.
    pub async fn renew_tokens(&mut self) -> Result<()> {
        if self.access_token.is_none() {
            return Err(Error::Config(
                "Can't renew the access token if there isn't one valid".into(),
            ));
        }
        let refresh_token = self.refresh_token.clone().ok_or_else(|| {
            Error::Config(
                "Can't renew the access token if there isn't a refresh token available".into(),
            )
        })?;

        let response = self
            .client
            .refresh_token(&refresh_token, TokenOptions::new())
            .await?;

        let (access_token, id_token) = match (response.access_token(), response.id_token()) {
            (Some(access), Some(id)) => (access.to_string(), id.to_string()),
            _ => {
                return Err(Error::Protocol(
                    "Token did not refresh correctly. Access or ID token not provided.".into(),
                ));
            }
        };

        self.set_access_token(access_token);
        self.set_id_token(id_token);
        if let Some(rotated) = response.refresh_token() {
            self.set_refresh_token(rotated);
        }

        info!("tokens renewed");
        Ok(())
    }

    /// Current user profile, completing a pending callback first if needed.
    ///
    /// The accessors run the exchange at most once per request; later calls
    /// only report what the first one stored.
    pub async fn user(&mut self) -> Result<Option<Value>> {
        if self.user.is_none() {
            self.exchange_once().await?;
        }
        Ok(self.user.clone())
    }

    /// Current access token, completing a pending callback first if needed.
    pub async fn access_token(&mut self) -> Result<Option<String>> {
        if self.access_token.is_none() {
            self.exchange_once().await?;
        }
        Ok(self.access_token.clone())
    }

    /// Current refresh token, completing a pending callback first if needed.
    pub async fn refresh_token(&mut self) -> Result<Option<String>> {
        if self.refresh_token.is_none() {
            self.exchange_once().await?;
        }
        Ok(self.refresh_token.clone())
    }

    /// Run `complete_exchange` unless this request's code was already used.
    async fn exchange_once(&mut self) -> Result<()> {
        if !self.exchange_attempted {
            self.complete_exchange().await?;
        }
        Ok(())
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    pub fn set_user(&mut self, user: Value) -> &mut Self {
        self.persist(SessionSlot::User, user.clone());
        self.user = Some(user);
        self
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) -> &mut Self {
        let token = token.into();
        self.persist(SessionSlot::AccessToken, Value::String(token.clone()));
        self.access_token = Some(token);
        self
    }

    pub fn set_refresh_token(&mut self, token: impl Into<String>) -> &mut Self {
        let token = token.into();
        self.persist(SessionSlot::RefreshToken, Value::String(token.clone()));
        self.refresh_token = Some(token);
        self
    }

    pub fn set_id_token(&mut self, token: impl Into<String>) -> &mut Self {
        let token = token.into();
        self.persist(SessionSlot::IdToken, Value::String(token.clone()));
        self.id_token = Some(token);
        self
    }

    fn persist(&self, slot: SessionSlot, value: Value) {
        if self.config.persists(slot) {
            self.store.set(slot.key(), value);
            debug!(slot = slot.key(), "persisted session slot");
        }
    }

    /// Forget the session's identity, in storage and in memory.
    pub fn logout(&mut self) {
        self.delete_all_persistent_data();
        self.user = None;
        self.access_token = None;
        self.refresh_token = None;
        self.id_token = None;
        info!("session logged out");
    }

    /// Delete every persisted slot from the store.
    pub fn delete_all_persistent_data(&self) {
        for slot in &self.config.persist {
            self.store.delete(slot.key());
        }
    }

    /// Logout redirect that returns the browser to `return_to`.
    pub fn logout_url(&self, return_to: Option<&str>) -> String {
        self.client
            .logout_url(return_to, Some(&self.config.client_id))
    }
}

/// Not null, `false`, or an empty string/array/object.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NullStore;
    use crate::testing::{ScriptedTransport, json_response};
    use serde_json::json;
    use transport::{HttpResponse, ReqwestTransport};

    fn config() -> AuthFlowConfig {
        AuthFlowConfig::new(
            "https://example.test",
            "cid",
            "csecret",
            "https://app.test/cb",
        )
    }

    fn flow(
        config: AuthFlowConfig,
        session: &Session,
        callback: CallbackParams,
        responses: Vec<HttpResponse>,
    ) -> (AuthFlow, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(responses));
        let flow = AuthFlow::new(config, session.clone(), callback, transport.clone()).unwrap();
        (flow, transport)
    }

    /// Decoded query parameter from a URL.
    fn query_param(url: &str, key: &str) -> Option<String> {
        let query = url.split_once('?')?.1;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then(|| urlencoding::decode(v).unwrap().into_owned())
        })
    }

    fn stored(session: &Session, key: &str) -> Option<Value> {
        session.snapshot().get(&format!("ace_auth_{key}")).cloned()
    }

    /// Run the login leg on `session` and return the state it issued.
    fn begin_login(session: &Session) -> String {
        let (flow, _) = flow(config(), session, CallbackParams::new(), vec![]);
        let url = flow.build_login_url(Params::new());
        query_param(&url, "state").unwrap()
    }

    fn callback(code: &str, state: &str) -> CallbackParams {
        CallbackParams::new()
            .with_query("code", code)
            .with_query("state", state)
    }

    fn user_ok(user: Value) -> HttpResponse {
        json_response(200, json!({"code": 200, "user": user}))
    }

    #[test]
    fn construction_requires_every_field() {
        let transport: Arc<dyn HttpTransport> = Arc::new(ScriptedTransport::default());
        let build = |config: AuthFlowConfig| {
            AuthFlow::new(config, Session::new(), CallbackParams::new(), transport.clone())
        };

        assert!(build(config()).is_ok());

        let cases: [(fn(&mut AuthFlowConfig), &str); 4] = [
            (|c| c.domain.clear(), "Invalid domain"),
            (|c| c.client_id.clear(), "Invalid client_id"),
            (|c| c.client_secret = None, "Invalid client_secret"),
            (|c| c.redirect_uri.clear(), "Invalid redirect_uri"),
        ];
        for (break_config, expected) in cases {
            let mut config = config();
            break_config(&mut config);
            match build(config) {
                Err(Error::Config(msg)) => assert_eq!(msg, expected),
                Err(other) => panic!("expected configuration error, got {other:?}"),
                Ok(_) => panic!("expected {expected}"),
            }
        }
    }

    #[test]
    fn login_url_scenario() {
        let session = Session::new();
        let (flow, transport) = flow(config(), &session, CallbackParams::new(), vec![]);
        let url = flow.build_login_url(Params::new());

        assert!(url.starts_with("https://example.test/oauth/authorize?"), "{url}");
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.test%2Fcb"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("response_mode=query"));
        assert!(!url.contains("scope="), "unset scope is dropped: {url}");

        let state = query_param(&url, "state").expect("state param");
        assert_eq!(stored(&session, "web_auth_state"), Some(json!(state)));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn login_url_form_post_mode() {
        let session = Session::new();
        let config = config().with_response_mode(ResponseMode::FormPost);
        let (flow, _) = flow(config, &session, CallbackParams::new(), vec![]);

        let url = flow.build_login_url(Params::new());
        assert_eq!(query_param(&url, "response_mode").as_deref(), Some("form_post"));

        let mut extra = Params::new();
        extra.insert("response_mode".into(), "fragment".into());
        let url = flow.build_login_url(extra);
        assert_eq!(query_param(&url, "response_mode").as_deref(), Some("fragment"));
    }

    #[test]
    fn login_url_caller_params_win_and_empties_drop() {
        let session = Session::new();
        let (flow, _) = flow(config().with_scope("openid"), &session, CallbackParams::new(), vec![]);

        let mut extra = Params::new();
        extra.insert("scope".into(), "openid email".into());
        extra.insert("prompt".into(), String::new());
        extra.insert("audience".into(), "https://api.test".into());
        let url = flow.build_login_url(extra);

        assert_eq!(query_param(&url, "scope").as_deref(), Some("openid email"));
        assert!(url.contains("scope=openid%20email"));
        assert_eq!(query_param(&url, "prompt"), None);
        assert_eq!(query_param(&url, "audience").as_deref(), Some("https://api.test"));
    }

    #[test]
    fn login_url_stores_caller_state() {
        let session = Session::new();
        let (flow, _) = flow(config(), &session, CallbackParams::new(), vec![]);

        let mut extra = Params::new();
        extra.insert("state".into(), "caller-state".into());
        let url = flow.build_login_url(extra);

        assert_eq!(query_param(&url, "state").as_deref(), Some("caller-state"));
        assert_eq!(stored(&session, "web_auth_state"), Some(json!("caller-state")));
    }

    #[test]
    fn start_login_redirects_with_state_and_connection() {
        let session = Session::new();
        let (flow, _) = flow(config(), &session, CallbackParams::new(), vec![]);

        let redirect = flow.start_login(Some("s-1"), Some("google-oauth2"), Params::new());
        let location = redirect.location();
        assert!(location.starts_with("https://example.test/oauth/authorize?"));
        assert_eq!(query_param(location, "state").as_deref(), Some("s-1"));
        assert_eq!(
            query_param(location, "connection").as_deref(),
            Some("google-oauth2")
        );
        assert_eq!(stored(&session, "web_auth_state"), Some(json!("s-1")));
    }

    #[test]
    fn start_login_without_state_issues_one() {
        let session = Session::new();
        let (flow, _) = flow(config(), &session, CallbackParams::new(), vec![]);

        let location = flow.start_login(None, None, Params::new()).into_location();
        let state = query_param(&location, "state").unwrap();
        assert_eq!(state.len(), 43);
        assert_eq!(query_param(&location, "connection"), None);
        assert_eq!(stored(&session, "web_auth_state"), Some(json!(state)));
    }

    #[tokio::test]
    async fn no_code_is_a_silent_no_op() {
        let session = Session::new();
        let state = begin_login(&session);
        let callback = CallbackParams::new().with_query("state", state.clone());
        let (mut flow, transport) = flow(config(), &session, callback, vec![]);

        assert!(!flow.complete_exchange().await.unwrap());
        assert!(transport.requests().is_empty());
        assert_eq!(
            stored(&session, "web_auth_state"),
            Some(json!(state)),
            "no code means no state validation"
        );
    }

    #[tokio::test]
    async fn mismatched_state_is_rejected_before_token_request() {
        let session = Session::new();
        begin_login(&session);
        let (mut flow, transport) = flow(config(), &session, callback("c", "forged"), vec![]);

        let err = flow.complete_exchange().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m == "Invalid state"), "got {err:?}");
        assert!(transport.requests().is_empty());
        assert_eq!(stored(&session, "web_auth_state"), None, "state consumed");
    }

    #[tokio::test]
    async fn absent_state_is_rejected() {
        let session = Session::new();
        begin_login(&session);
        let callback = CallbackParams::new().with_query("code", "c");
        let (mut flow, transport) = flow(config(), &session, callback, vec![]);

        let err = flow.complete_exchange().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m == "Invalid state"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn exchange_scenario_without_refresh_token() {
        let session = Session::new();
        let state = begin_login(&session);
        let (mut flow, transport) = flow(
            config(),
            &session,
            callback("the-code", &state),
            vec![
                json_response(200, json!({"access_token": "AT1"})),
                user_ok(json!({"id": 1})),
            ],
        );

        assert!(flow.complete_exchange().await.unwrap());
        assert_eq!(flow.access_token().await.unwrap().as_deref(), Some("AT1"));
        assert_eq!(flow.user().await.unwrap(), Some(json!({"id": 1})));

        assert_eq!(stored(&session, "access_token"), Some(json!("AT1")));
        assert_eq!(stored(&session, "user"), Some(json!({"id": 1})));
        assert_eq!(stored(&session, "refresh_token"), None);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "https://example.test/oauth/token");
        assert_eq!(transport.json_body(0)["code"], "the-code");
        assert_eq!(transport.json_body(0)["redirect_uri"], "https://app.test/cb");
        assert_eq!(requests[1].url, "https://example.test/api/user");
        assert_eq!(requests[1].header("authorization"), Some("Bearer AT1"));
    }

    #[tokio::test]
    async fn exchange_persists_refresh_token_when_returned() {
        let session = Session::new();
        let state = begin_login(&session);
        let (mut flow, _) = flow(
            config(),
            &session,
            callback("c", &state),
            vec![
                json_response(200, json!({"access_token": "AT1", "refresh_token": "RT1"})),
                user_ok(json!({"id": 1})),
            ],
        );

        flow.complete_exchange().await.unwrap();
        assert_eq!(stored(&session, "refresh_token"), Some(json!("RT1")));
        assert_eq!(flow.refresh_token().await.unwrap().as_deref(), Some("RT1"));
    }

    #[tokio::test]
    async fn missing_access_token_fails() {
        let session = Session::new();
        let state = begin_login(&session);
        let (mut flow, transport) = flow(
            config(),
            &session,
            callback("c", &state),
            vec![json_response(200, json!({}))],
        );

        let err = flow.complete_exchange().await.unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ref m) if m == "Invalid access_token - Retry login."),
            "got {err:?}"
        );
        assert_eq!(transport.requests().len(), 1, "no userinfo call");
        assert_eq!(stored(&session, "access_token"), None);
    }

    #[tokio::test]
    async fn active_session_blocks_second_exchange() {
        let session = Session::new();
        SessionStore::with_defaults(session.clone()).set("user", json!({"id": 9}));
        let state = begin_login(&session);
        let (mut flow, transport) = flow(config(), &session, callback("c", &state), vec![]);

        let err = flow.complete_exchange().await.unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ref m) if m.starts_with("Can't initialize a new session")),
            "got {err:?}"
        );
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn failed_profile_lookup_keeps_tokens() {
        let session = Session::new();
        let state = begin_login(&session);
        let (mut flow, _) = flow(
            config(),
            &session,
            callback("c", &state),
            vec![
                json_response(200, json!({"access_token": "AT1"})),
                json_response(200, json!({"code": 403, "message": "User is blocked"})),
            ],
        );

        let err = flow.complete_exchange().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m == "User is blocked"), "got {err:?}");
        assert_eq!(stored(&session, "access_token"), Some(json!("AT1")));
        assert_eq!(stored(&session, "user"), None);
    }

    #[tokio::test]
    async fn profile_failure_without_message_uses_fallback() {
        let session = Session::new();
        let state = begin_login(&session);
        let (mut flow, _) = flow(
            config(),
            &session,
            callback("c", &state),
            vec![
                json_response(200, json!({"access_token": "AT1"})),
                json_response(200, json!({"code": 500})),
            ],
        );

        let err = flow.complete_exchange().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m == "userinfo request failed"));
    }

    #[tokio::test]
    async fn form_post_reads_body_fields() {
        let session = Session::new();
        let config = config().with_response_mode(ResponseMode::FormPost);
        let state = {
            let (flow, _) = flow(config.clone(), &session, CallbackParams::new(), vec![]);
            query_param(&flow.build_login_url(Params::new()), "state").unwrap()
        };

        // Query parameters are ignored in form_post mode
        let query_only = callback("c", &state);
        let (mut flow_q, transport_q) = flow(config.clone(), &session, query_only, vec![]);
        assert!(!flow_q.complete_exchange().await.unwrap());
        assert!(transport_q.requests().is_empty());

        let posted = CallbackParams::new()
            .with_form("code", "c")
            .with_form("state", state);
        let (mut flow, _) = flow(
            config,
            &session,
            posted,
            vec![
                json_response(200, json!({"access_token": "AT1"})),
                user_ok(json!({"id": 2})),
            ],
        );
        assert!(flow.complete_exchange().await.unwrap());
        assert_eq!(flow.user().await.unwrap(), Some(json!({"id": 2})));
    }

    #[tokio::test]
    async fn accessors_complete_pending_callback_once() {
        let session = Session::new();
        let state = begin_login(&session);
        let (mut flow, transport) = flow(
            config(),
            &session,
            callback("c", &state),
            vec![
                json_response(200, json!({"access_token": "AT1"})),
                user_ok(json!({"id": 1})),
            ],
        );

        assert_eq!(flow.user().await.unwrap(), Some(json!({"id": 1})));
        assert_eq!(flow.access_token().await.unwrap().as_deref(), Some("AT1"));
        assert_eq!(transport.requests().len(), 2, "one exchange, one profile fetch");
    }

    #[tokio::test]
    async fn missing_refresh_token_does_not_rerun_exchange() {
        let session = Session::new();
        let state = begin_login(&session);
        let (mut flow, transport) = flow(
            config(),
            &session,
            callback("c", &state),
            vec![
                json_response(200, json!({"access_token": "AT1"})),
                user_ok(json!({"id": 1})),
            ],
        );

        assert_eq!(flow.user().await.unwrap(), Some(json!({"id": 1})));
        assert_eq!(flow.refresh_token().await.unwrap(), None);
        assert_eq!(flow.refresh_token().await.unwrap(), None);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn failed_exchange_is_not_retried_by_accessors() {
        let session = Session::new();
        begin_login(&session);
        let (mut flow, transport) = flow(config(), &session, callback("c", "forged"), vec![]);

        assert!(flow.user().await.is_err());
        assert_eq!(flow.user().await.unwrap(), None);
        assert_eq!(flow.access_token().await.unwrap(), None);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn accessors_without_code_return_none() {
        let session = Session::new();
        let (mut flow, transport) = flow(config(), &session, CallbackParams::new(), vec![]);

        assert_eq!(flow.user().await.unwrap(), None);
        assert_eq!(flow.access_token().await.unwrap(), None);
        assert_eq!(flow.refresh_token().await.unwrap(), None);
        assert_eq!(flow.id_token(), None);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn identity_is_loaded_from_session() {
        let session = Session::new();
        let store = SessionStore::with_defaults(session.clone());
        store.set("access_token", json!("AT0"));
        store.set("refresh_token", json!("RT0"));
        store.set("user", json!({"id": 5}));

        let (mut flow, transport) = flow(config(), &session, CallbackParams::new(), vec![]);
        assert_eq!(flow.access_token().await.unwrap().as_deref(), Some("AT0"));
        assert_eq!(flow.refresh_token().await.unwrap().as_deref(), Some("RT0"));
        assert_eq!(flow.user().await.unwrap(), Some(json!({"id": 5})));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn renew_requires_access_token() {
        let session = Session::new();
        let (mut flow, transport) = flow(config(), &session, CallbackParams::new(), vec![]);

        let err = flow.renew_tokens().await.unwrap_err();
        assert!(
            matches!(err, Error::Config(ref m) if m == "Can't renew the access token if there isn't one valid"),
            "got {err:?}"
        );
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn renew_requires_refresh_token() {
        let session = Session::new();
        let (mut flow, transport) = flow(config(), &session, CallbackParams::new(), vec![]);
        flow.set_access_token("AT0");

        let err = flow.renew_tokens().await.unwrap_err();
        assert!(err.is_config(), "got {err:?}");
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn renew_persists_new_tokens() {
        let session = Session::new();
        let (mut flow, transport) = flow(
            config(),
            &session,
            CallbackParams::new(),
            vec![json_response(
                200,
                json!({"access_token": "AT2", "id_token": "IDT2", "refresh_token": "RT2"}),
            )],
        );
        flow.set_access_token("AT1").set_refresh_token("RT1");

        flow.renew_tokens().await.unwrap();
        assert_eq!(flow.access_token().await.unwrap().as_deref(), Some("AT2"));
        assert_eq!(flow.id_token(), Some("IDT2"));
        assert_eq!(stored(&session, "access_token"), Some(json!("AT2")));
        assert_eq!(stored(&session, "refresh_token"), Some(json!("RT2")));
        assert_eq!(stored(&session, "id_token"), None, "id_token not in persistence set");

        let body = transport.json_body(0);
        assert_eq!(body["grant_type"], "refresh_token");
        assert_eq!(body["refresh_token"], "RT1");
    }

    #[tokio::test]
    async fn renew_persists_id_token_when_configured() {
        let session = Session::new();
        let config = config().with_persistence([SessionSlot::AccessToken, SessionSlot::IdToken]);
        let (mut flow, _) = flow(
            config,
            &session,
            CallbackParams::new(),
            vec![json_response(200, json!({"access_token": "AT2", "id_token": "IDT2"}))],
        );
        flow.set_access_token("AT1").set_refresh_token("RT1");

        flow.renew_tokens().await.unwrap();
        assert_eq!(stored(&session, "id_token"), Some(json!("IDT2")));
        assert_eq!(stored(&session, "refresh_token"), None);
    }

    #[tokio::test]
    async fn renew_without_id_token_fails() {
        let session = Session::new();
        let (mut flow, _) = flow(
            config(),
            &session,
            CallbackParams::new(),
            vec![json_response(200, json!({"access_token": "AT2"}))],
        );
        flow.set_access_token("AT1").set_refresh_token("RT1");

        let err = flow.renew_tokens().await.unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ref m) if m.starts_with("Token did not refresh correctly")),
            "got {err:?}"
        );
        assert_eq!(stored(&session, "access_token"), Some(json!("AT1")));
    }

    #[tokio::test]
    async fn logout_clears_storage_and_memory() {
        let session = Session::new();
        let (mut flow, _) = flow(config(), &session, CallbackParams::new(), vec![]);
        flow.set_access_token("AT1")
            .set_refresh_token("RT1")
            .set_id_token("IDT1")
            .set_user(json!({"id": 1}));
        assert_eq!(session.snapshot().len(), 3);

        flow.logout();
        assert!(session.snapshot().is_empty());
        assert_eq!(flow.user().await.unwrap(), None);
        assert_eq!(flow.access_token().await.unwrap(), None);
        assert_eq!(flow.refresh_token().await.unwrap(), None);
        assert_eq!(flow.id_token(), None);
    }

    #[test]
    fn logout_leaves_pending_state_alone() {
        let session = Session::new();
        let state = begin_login(&session);
        let (mut flow, _) = flow(config(), &session, CallbackParams::new(), vec![]);
        flow.logout();
        assert_eq!(stored(&session, "web_auth_state"), Some(json!(state)));
    }

    #[test]
    fn slots_outside_persistence_set_stay_in_memory() {
        let session = Session::new();
        let config = config().with_persistence([SessionSlot::AccessToken]);
        let (mut flow, _) = flow(config, &session, CallbackParams::new(), vec![]);

        flow.set_user(json!({"id": 1})).set_access_token("AT1");
        assert_eq!(stored(&session, "user"), None);
        assert_eq!(stored(&session, "access_token"), Some(json!("AT1")));
    }

    #[test]
    fn null_store_keeps_nothing() {
        let session = Session::new();
        SessionStore::with_defaults(session.clone()).set("access_token", json!("AT0"));
        let (flow, _) = flow(config(), &session, CallbackParams::new(), vec![]);
        let mut flow = flow.with_store(Box::new(NullStore));

        flow.set_access_token("AT1");
        assert_eq!(stored(&session, "access_token"), Some(json!("AT0")));
    }

    #[test]
    fn custom_prefix_namespaces_every_key() {
        let session = Session::new();
        let config = config().with_session(crate::config::SessionSettings {
            prefix: "shop".into(),
            cookie_expires_secs: 60,
        });
        let (mut flow, _) = flow(config, &session, CallbackParams::new(), vec![]);
        flow.set_access_token("AT1");
        flow.build_login_url(Params::new());

        let raw = session.snapshot();
        assert!(raw.contains_key("shop_access_token"));
        assert!(raw.contains_key("shop_web_auth_state"));
        assert_eq!(session.lifetime(), Some(std::time::Duration::from_secs(60)));
    }

    #[test]
    fn logout_url_carries_client_id() {
        let (flow, _) = flow(config(), &Session::new(), CallbackParams::new(), vec![]);
        assert_eq!(
            flow.logout_url(Some("https://app.test/")),
            "https://example.test/auth_logout?returnTo=https%3A%2F%2Fapp.test%2F&client_id=cid"
        );
    }

    #[test]
    fn presence_rules() {
        assert!(!is_present(&Value::Null));
        assert!(!is_present(&json!(false)));
        assert!(!is_present(&json!("")));
        assert!(!is_present(&json!({})));
        assert!(!is_present(&json!([])));
        assert!(is_present(&json!({"id": 1})));
        assert!(is_present(&json!(0)));
    }

    /// Mock authorization server with token and profile endpoints.
    async fn start_auth_server() -> (String, tokio::task::JoinHandle<()>) {
        use axum::Json;
        use axum::http::HeaderMap;
        use axum::routing::post;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let app = axum::Router::new()
            .route(
                "/oauth/token",
                post(|Json(body): Json<Value>| async move {
                    if body["grant_type"] == "authorization_code" && body["code"] == "good-code" {
                        Json(json!({"access_token": "AT-live", "refresh_token": "RT-live"}))
                    } else {
                        Json(json!({}))
                    }
                }),
            )
            .route(
                "/api/user",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    let bearer = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if bearer == "Bearer AT-live" && body["client_id"] == "cid" {
                        Json(json!({"code": 200, "user": {"id": 77, "name": "Ada"}}))
                    } else {
                        Json(json!({"code": 401, "message": "bad token"}))
                    }
                }),
            );

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, handle)
    }

    #[tokio::test]
    async fn full_flow_against_live_server() {
        let (url, _server) = start_auth_server().await;
        let config = AuthFlowConfig::new(url, "cid", "csecret", "https://app.test/cb");
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::default());
        let session = Session::new();

        // Request 1: login redirect
        let login = AuthFlow::new(
            config.clone(),
            session.clone(),
            CallbackParams::new(),
            transport.clone(),
        )
        .unwrap();
        let location = login.start_login(None, None, Params::new()).into_location();
        let state = query_param(&location, "state").unwrap();

        // Request 2: callback
        let mut callback_flow = AuthFlow::new(
            config.clone(),
            session.clone(),
            callback("good-code", &state),
            transport.clone(),
        )
        .unwrap();
        assert_eq!(
            callback_flow.user().await.unwrap(),
            Some(json!({"id": 77, "name": "Ada"}))
        );

        // Request 3: replaying the callback is rejected
        let mut replay = AuthFlow::new(
            config,
            session.clone(),
            callback("good-code", &state),
            transport,
        )
        .unwrap();
        assert_eq!(replay.access_token().await.unwrap().as_deref(), Some("AT-live"));
        let err = replay.complete_exchange().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m == "Invalid state"));
    }
}
