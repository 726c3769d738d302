//! HTTP transport abstraction for authorization-server calls
//!
//! Defines the `HttpTransport` trait that decouples the OAuth client from the
//! HTTP stack. `ReqwestTransport` is the production implementation; tests
//! substitute scripted transports that never touch the network.
//!
//! A request is plain data (`HttpRequest`): method, absolute URL, headers and
//! one of the supported body encodings. The transport reports every response
//! it receives, including 4xx/5xx; interpreting status codes is the caller's
//! job.

pub mod header;
pub mod reqwest_transport;

pub use header::Header;
pub use reqwest_transport::ReqwestTransport;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;

/// Errors from the transport layer itself (never from HTTP status codes).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// HTTP methods the authorization client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Methods that carry a JSON body by default.
    pub fn sends_body(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "patch" => Ok(Method::Patch),
            "delete" => Ok(Method::Delete),
            other => Err(TransportError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Request payload encodings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Pre-encoded body (usually JSON); content type comes from the headers.
    Raw(String),
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    /// `multipart/form-data`: files (field name, path on disk) then text fields.
    Multipart {
        files: Vec<(String, PathBuf)>,
        fields: Vec<(String, String)>,
    },
}

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<Header>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Response as seen by the caller: status, headers, and the body as text.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over the HTTP stack used to reach the authorization server.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn HttpTransport>`).
pub trait HttpTransport: Send + Sync {
    /// Send one request and return whatever the server answered.
    ///
    /// Only failures to obtain a response are errors; 4xx/5xx responses are
    /// returned as `Ok`.
    fn send<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
        assert!(matches!(
            "trace".parse::<Method>(),
            Err(TransportError::UnsupportedMethod(m)) if m == "trace"
        ));
    }

    #[test]
    fn only_get_skips_body() {
        assert!(!Method::Get.sends_body());
        for m in [Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert!(m.sends_body(), "{m} should send a body");
        }
    }

    #[test]
    fn response_header_lookup_ignores_case() {
        let response = HttpResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: "{}".into(),
        };
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert!(response.header("x-missing").is_none());
        assert!(response.is_success());
    }

    #[test]
    fn request_header_lookup_ignores_case() {
        let mut request = HttpRequest::new(Method::Post, "https://example.test/oauth/token");
        request.headers.push(Header::content_type("application/json"));
        assert_eq!(request.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(request.body, RequestBody::Empty);
    }
}
