//! Error types for the authorization flow

/// Errors from authorization flow operations.
///
/// `Config` and `Protocol` are the two failure kinds the flow raises itself.
/// Neither is retryable: the caller is expected to restart the login. Transport
/// failures are passed through untouched.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid configuration, or a call made without the inputs it needs.
    #[error("configuration error: {0}")]
    Config(String),

    /// The authorization server or the callback broke the flow.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Transport(#[from] transport::TransportError),

    #[error("authorization server returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl Error {
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
