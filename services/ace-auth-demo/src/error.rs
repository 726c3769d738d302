//! Service-specific error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

/// Per-request failures, rendered as JSON error responses.
///
/// Startup failures go through `anyhow` in `main` and never reach here.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] ace_auth::Error),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("no refresh token available")]
    NoRefreshToken,
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Auth(ace_auth::Error::Protocol(_)) => StatusCode::BAD_REQUEST,
            Error::Auth(ace_auth::Error::Config(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Auth(ace_auth::Error::Transport(_) | ace_auth::Error::Status { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Unauthenticated | Error::NoRefreshToken => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
