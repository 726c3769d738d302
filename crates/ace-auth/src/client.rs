//! Authorization-server client: URLs, token grants and profile lookup
//!
//! Handles the server interactions of the code flow:
//! 1. Authorize/logout URLs (browser redirect targets, never fetched here)
//! 2. Authorization code exchange
//! 3. Refresh token grant
//! 4. Profile lookup with the access token
//!
//! Both grants POST a JSON body to `oauth/token`. The client keeps no state
//! between calls.

use std::sync::Arc;

use common::Secret;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;
use transport::{Header, HttpTransport, Method};

use crate::constants::{
    AUTHORIZE_PATH, FORWARDED_FOR_OPTION, LOGOUT_PATH, TOKEN_PATH, USERINFO_PATH,
};
use crate::error::{Error, Result};
use crate::request::ApiClient;

/// Ordered URL parameters. Insertion order is preserved in the query string.
pub type Params = IndexMap<String, String>;

/// Body options for a token grant.
pub type TokenOptions = Map<String, Value>;

/// Response from the token endpoint for both exchange and refresh.
///
/// Every field is optional on the wire; the flow decides which ones it
/// requires for each grant.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Access token, if present and non-empty.
    pub fn access_token(&self) -> Option<&str> {
        non_empty(&self.access_token)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(&self.refresh_token)
    }

    pub fn id_token(&self) -> Option<&str> {
        non_empty(&self.id_token)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Client for one authorization server and one registered application.
pub struct TokenClient {
    domain: String,
    client_id: String,
    client_secret: Secret<String>,
    api: ApiClient,
    transport: Arc<dyn HttpTransport>,
}

impl TokenClient {
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let domain = domain.into();
        Self {
            api: ApiClient::new(domain.clone(), "/"),
            domain,
            client_id: client_id.into(),
            client_secret,
            transport,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Build `{domain}/oauth/authorize?...`.
    ///
    /// `response_type`, `redirect_uri` and `client_id` always take the values
    /// given here, even when `extra` carries the same keys. `connection` and
    /// `state` are added only when present.
    pub fn authorize_url(
        &self,
        response_type: &str,
        redirect_uri: &str,
        connection: Option<&str>,
        state: Option<&str>,
        extra: Params,
    ) -> String {
        let mut params = extra;
        params.insert("response_type".into(), response_type.into());
        params.insert("redirect_uri".into(), redirect_uri.into());
        params.insert("client_id".into(), self.client_id.clone());

        if let Some(connection) = connection {
            params.insert("connection".into(), connection.into());
        }
        if let Some(state) = state {
            params.insert("state".into(), state.into());
        }

        format!("{}/{AUTHORIZE_PATH}?{}", self.domain, build_query(&params))
    }

    /// Build `{domain}/auth_logout?...` with only the given parameters.
    pub fn logout_url(&self, return_to: Option<&str>, client_id: Option<&str>) -> String {
        let mut params = Params::new();
        if let Some(return_to) = return_to {
            params.insert("returnTo".into(), return_to.into());
        }
        if let Some(client_id) = client_id {
            params.insert("client_id".into(), client_id.into());
        }

        format!("{}/{LOGOUT_PATH}?{}", self.domain, build_query(&params))
    }

    /// Fetch the profile envelope for `access_token`.
    pub async fn user_info(&self, access_token: &str) -> Result<Value> {
        let body = json!({ "client_id": self.client_id });
        self.api
            .method(Method::Post)
            .with_segment(USERINFO_PATH)
            .with_body(body.to_string())
            .with_header(Header::bearer(access_token))
            .call(self.transport.as_ref())
            .await?
            .into_json()
            .ok_or_else(|| Error::Protocol("userinfo response was not JSON".into()))
    }

    /// POST a grant to the token endpoint.
    ///
    /// `client_id` and `client_secret` default to the configured values. An
    /// `auth0_forwarded_for` option is sent as the `Auth0-Forwarded-For`
    /// header, not as body data.
    pub async fn oauth_token(&self, mut options: TokenOptions) -> Result<TokenResponse> {
        if is_unset(options.get("client_id")) {
            options.insert("client_id".into(), Value::String(self.client_id.clone()));
        }
        if is_unset(options.get("client_secret")) {
            options.insert(
                "client_secret".into(),
                Value::String(self.client_secret.expose().clone()),
            );
        }
        if is_unset(options.get("grant_type")) {
            return Err(Error::Config("grant_type is mandatory".into()));
        }

        let forwarded_for = options.remove(FORWARDED_FOR_OPTION);
        let body = Value::Object(options).to_string();

        let mut request = self
            .api
            .method(Method::Post)
            .with_segment(TOKEN_PATH)
            .with_body(body);
        if let Some(ip) = forwarded_for {
            let ip = match ip {
                Value::String(s) => s,
                other => other.to_string(),
            };
            request = request.with_header(Header::forwarded_for(ip));
        }

        let response = request
            .call(self.transport.as_ref())
            .await?
            .into_json()
            .ok_or_else(|| Error::Protocol("token response was not JSON".into()))?;

        serde_json::from_value(response)
            .map_err(|e| Error::Protocol(format!("invalid token response: {e}")))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        let mut options = TokenOptions::new();
        options.insert(
            "client_secret".into(),
            Value::String(self.client_secret.expose().clone()),
        );
        options.insert("redirect_uri".into(), redirect_uri.into());
        options.insert("code".into(), code.into());
        options.insert("grant_type".into(), "authorization_code".into());

        debug!("exchanging authorization code");
        self.oauth_token(options).await
    }

    /// Obtain new tokens with a refresh token.
    ///
    /// Rejects blank input before any request is made: the refresh token, and
    /// the client credentials after defaulting.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        mut options: TokenOptions,
    ) -> Result<TokenResponse> {
        if refresh_token.trim().is_empty() {
            return Err(Error::Config("Refresh token cannot be blank".into()));
        }

        if !options.contains_key("client_secret") {
            options.insert(
                "client_secret".into(),
                Value::String(self.client_secret.expose().clone()),
            );
        }
        if is_blank(options.get("client_secret")) {
            return Err(Error::Config("client_secret is mandatory".into()));
        }

        if !options.contains_key("client_id") {
            options.insert("client_id".into(), Value::String(self.client_id.clone()));
        }
        if is_blank(options.get("client_id")) {
            return Err(Error::Config("client_id is mandatory".into()));
        }

        options.insert("refresh_token".into(), refresh_token.into());
        options.insert("grant_type".into(), "refresh_token".into());

        debug!("refreshing access token");
        self.oauth_token(options).await
    }
}

/// Key missing or explicitly null.
fn is_unset(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Unset, or a string with no content.
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// RFC 3986 query string (`%20` for spaces), keeping parameter order.
fn build_query(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
