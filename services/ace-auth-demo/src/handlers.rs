//! Login flow endpoints
//!
//! `/login` is the only route that registers a browser session. The others
//! look up the session named by the cookie and build an `AuthFlow` on it;
//! without one, `/me` and `/renew` answer 401 and `/callback` and `/logout`
//! run against a throwaway session.
//!
//! - GET  /login         : redirect to the authorization server
//! - GET|POST /callback  : complete the code exchange, redirect to /me
//! - GET  /me            : profile of the signed-in user
//! - POST /renew         : refresh the access token
//! - GET  /logout        : clear the session, redirect to the logout URL

use std::collections::HashMap;

use ace_auth::{AuthFlow, CallbackParams, Params, Session};
use axum::Form;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub connection: Option<String>,
}

fn flow_for(state: &AppState, session: &Session, callback: CallbackParams) -> Result<AuthFlow> {
    Ok(AuthFlow::new(
        state.auth.clone(),
        session.clone(),
        callback,
        state.transport.clone(),
    )?)
}

fn with_cookie(cookie: String, response: impl IntoResponse) -> Response {
    ([(SET_COOKIE, cookie)], response).into_response()
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Result<Response> {
    let session = state.sessions.resolve(&headers).await;
    let flow = flow_for(&state, &session, CallbackParams::new())?;

    let redirect = flow.start_login(None, query.connection.as_deref(), Params::new());
    Ok(with_cookie(
        state.sessions.cookie(&session),
        Redirect::to(redirect.location()),
    ))
}

pub async fn callback_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let params = CallbackParams::from_parts(query, HashMap::new());
    finish_callback(state, headers, params).await
}

pub async fn callback_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response> {
    let params = CallbackParams::from_parts(query, form);
    finish_callback(state, headers, params).await
}

async fn finish_callback(
    state: AppState,
    headers: HeaderMap,
    params: CallbackParams,
) -> Result<Response> {
    let session = state.sessions.find(&headers).await.unwrap_or_default();
    let mut flow = flow_for(&state, &session, params)?;

    if !flow.complete_exchange().await? {
        let err = ace_auth::Error::Protocol("callback carried no authorization code".into());
        return Err(err.into());
    }

    info!(session = session.id(), "login completed");
    Ok(with_cookie(state.sessions.cookie(&session), Redirect::to("/me")))
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let session = state
        .sessions
        .find(&headers)
        .await
        .ok_or(Error::Unauthenticated)?;
    let mut flow = flow_for(&state, &session, CallbackParams::new())?;

    let user = flow.user().await?.ok_or(Error::Unauthenticated)?;
    let body = serde_json::json!({
        "user": user,
        "has_refresh_token": flow.refresh_token().await?.is_some(),
    });
    Ok(with_cookie(
        state.sessions.cookie(&session),
        (
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        ),
    ))
}

pub async fn renew(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let session = state
        .sessions
        .find(&headers)
        .await
        .ok_or(Error::Unauthenticated)?;
    let mut flow = flow_for(&state, &session, CallbackParams::new())?;

    if flow.access_token().await?.is_none() {
        return Err(Error::Unauthenticated);
    }
    if flow.refresh_token().await?.is_none() {
        return Err(Error::NoRefreshToken);
    }
    flow.renew_tokens().await?;
    Ok(with_cookie(
        state.sessions.cookie(&session),
        StatusCode::NO_CONTENT,
    ))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let session = state.sessions.find(&headers).await.unwrap_or_default();
    let mut flow = flow_for(&state, &session, CallbackParams::new())?;

    flow.logout();
    let location = flow.logout_url(state.post_logout_redirect.as_deref());
    state.sessions.remove(session.id()).await;

    Ok(with_cookie(
        state.sessions.expired_cookie(),
        Redirect::to(&location),
    ))
}
