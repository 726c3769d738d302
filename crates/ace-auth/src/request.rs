//! Fluent request builder for authorization-server endpoints
//!
//! `ApiClient` holds what every request shares (domain, base path, default
//! headers, return type). `ApiClient::method` starts a `RequestBuilder`, which
//! accumulates path segments, query and form parameters, files, headers and a
//! body, then executes over an `HttpTransport`.
//!
//! ```text
//! api.method(Method::Post)
//!     .with_segment("oauth/token")
//!     .with_body(json)
//!     .call(transport)
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;
use transport::{Header, HttpRequest, HttpResponse, HttpTransport, Method, RequestBody};

use crate::error::{Error, Result};

/// What `RequestBuilder::call` hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    /// Decoded body: JSON when the response says so, text otherwise.
    #[default]
    Body,
    Headers,
    /// The whole response.
    Object,
}

impl FromStr for ReturnType {
    type Err = Error;

    /// An empty selector means `Body`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "body" => Ok(ReturnType::Body),
            "headers" => Ok(ReturnType::Headers),
            "object" => Ok(ReturnType::Object),
            _ => Err(Error::Config("Invalid returnType".into())),
        }
    }
}

/// Result of an executed request, shaped by its `ReturnType`.
#[derive(Debug, Clone)]
pub enum ApiResponse {
    Json(Value),
    Text(String),
    Headers(Vec<(String, String)>),
    Object(HttpResponse),
}

impl ApiResponse {
    pub fn into_json(self) -> Option<Value> {
        match self {
            ApiResponse::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Query or form parameter value. Booleans are sent as `true`/`false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamValue(String);

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self(if value { "true" } else { "false" }.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared settings for requests against one authorization server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    domain: String,
    base_path: String,
    headers: Vec<Header>,
    return_type: ReturnType,
}

impl ApiClient {
    pub fn new(domain: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            base_path: base_path.into(),
            headers: Vec::new(),
            return_type: ReturnType::default(),
        }
    }

    /// Header added to every request built from this client.
    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn with_return_type(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Start a request. Methods with a body default to `application/json`.
    pub fn method(&self, method: Method) -> RequestBuilder {
        let builder = self.method_without_content_type(method);
        if method.sends_body() {
            builder.with_header(Header::content_type("application/json"))
        } else {
            builder
        }
    }

    pub fn method_without_content_type(&self, method: Method) -> RequestBuilder {
        RequestBuilder {
            domain: self.domain.clone(),
            base_path: self.base_path.clone(),
            method,
            path: Vec::new(),
            headers: Vec::new(),
            params: IndexMap::new(),
            form_params: IndexMap::new(),
            files: IndexMap::new(),
            body: None,
            return_type: self.return_type,
        }
        .with_headers(self.headers.iter().cloned())
    }
}

/// One request under construction.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    domain: String,
    base_path: String,
    method: Method,
    path: Vec<String>,
    headers: Vec<Header>,
    params: IndexMap<String, String>,
    form_params: IndexMap<String, String>,
    files: IndexMap<String, PathBuf>,
    body: Option<String>,
    return_type: ReturnType,
}

impl RequestBuilder {
    /// Append a path segment (may itself contain `/`).
    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }

    /// Append `name/value`, e.g. `users/{id}`.
    pub fn with_segment_value(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_segment(name).with_segment(value)
    }

    pub fn with_path_variable(self, variable: impl Into<String>) -> Self {
        self.with_segment(variable)
    }

    /// Set a query parameter; empty values are left out of the URL.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into().0);
        self
    }

    pub fn with_query_params<K, V>(self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<ParamValue>,
    {
        params
            .into_iter()
            .fold(self, |builder, (k, v)| builder.with_query_param(k, v))
    }

    pub fn with_form_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.form_params.insert(key.into(), value.into().0);
        self
    }

    /// Attach a file; the request is then sent as multipart.
    pub fn with_file(mut self, field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.insert(field.into(), path.into());
        self
    }

    /// Add a header, replacing any earlier header of the same name.
    pub fn with_header(mut self, header: Header) -> Self {
        self.headers
            .retain(|h| !h.name.eq_ignore_ascii_case(&header.name));
        self.headers.push(header);
        self
    }

    pub fn with_headers(self, headers: impl IntoIterator<Item = Header>) -> Self {
        headers
            .into_iter()
            .fold(self, |builder, h| builder.with_header(h))
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_return_type(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Absolute URL: domain, base path, segments, then the query string.
    pub fn url(&self) -> String {
        let path = self.path.join("/");
        let parts = [
            self.domain.trim_end_matches('/'),
            self.base_path.trim_matches('/'),
            path.trim_matches('/'),
        ];
        let mut url = parts
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");

        let query = self
            .params
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    /// Build the transport request. Files win over form params, form params
    /// win over a raw body.
    pub fn build(self) -> HttpRequest {
        let url = self.url();
        let form = self.form_params.into_iter().collect::<Vec<_>>();
        let body = if !self.files.is_empty() {
            RequestBody::Multipart {
                files: self.files.into_iter().collect(),
                fields: form,
            }
        } else if !form.is_empty() {
            RequestBody::Form(form)
        } else {
            match self.body {
                Some(raw) => RequestBody::Raw(raw),
                None => RequestBody::Empty,
            }
        };

        HttpRequest {
            method: self.method,
            url,
            headers: self.headers,
            body,
        }
    }

    /// Execute the request.
    ///
    /// A 4xx/5xx response becomes `Error::Status`; transport failures pass
    /// through unchanged.
    pub async fn call(self, transport: &dyn HttpTransport) -> Result<ApiResponse> {
        let return_type = self.return_type;
        let request = self.build();
        debug!(method = %request.method, url = %request.url, "calling authorization server");

        let response = transport.send(request).await?;
        if response.status >= 400 {
            return Err(Error::Status {
                status: response.status,
                body: response.body,
            });
        }

        match return_type {
            ReturnType::Headers => Ok(ApiResponse::Headers(response.headers)),
            ReturnType::Object => Ok(ApiResponse::Object(response)),
            ReturnType::Body => {
                let is_json = response
                    .header("content-type")
                    .is_some_and(|ct| ct.contains("json"));
                if is_json {
                    serde_json::from_str(&response.body)
                        .map(ApiResponse::Json)
                        .map_err(|e| Error::Protocol(format!("invalid JSON response: {e}")))
                } else {
                    Ok(ApiResponse::Text(response.body))
                }
            }
        }
    }
}
