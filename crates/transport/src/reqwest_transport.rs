//! reqwest-backed transport.
//!
//! Translates `HttpRequest` into a reqwest call. Form and multipart bodies
//! carry their own content type, so an explicit `Content-Type` header is
//! dropped for those encodings.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::multipart;
use tracing::debug;

use crate::header::CONTENT_TYPE;
use crate::{HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, Result, TransportError};

/// Production transport wrapping a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let self_typed = matches!(body, RequestBody::Form(_) | RequestBody::Multipart { .. });
        let mut builder = self.client.request(reqwest_method(method), &url);

        for header in &headers {
            if self_typed && header.name.eq_ignore_ascii_case(CONTENT_TYPE) {
                continue;
            }
            let name = HeaderName::from_str(&header.name)
                .map_err(|e| TransportError::InvalidHeader(format!("{}: {e}", header.name)))?;
            let value = HeaderValue::from_str(&header.value)
                .map_err(|e| TransportError::InvalidHeader(format!("{}: {e}", header.name)))?;
            builder = builder.header(name, value);
        }

        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Raw(raw) => builder.body(raw),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart { files, fields } => {
                builder.multipart(build_multipart(files, fields).await?)
            }
        };

        debug!(%method, url = %url, "dispatching request");

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(format!("{method} {url}: {e}")))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(format!("reading response body: {e}")))?;

        debug!(status, url = %url, "response received");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Files first, then text fields.
async fn build_multipart(
    files: Vec<(String, std::path::PathBuf)>,
    fields: Vec<(String, String)>,
) -> Result<multipart::Form> {
    let mut form = multipart::Form::new();
    for (field, path) in files {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| TransportError::Io(format!("reading {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| field.clone());
        form = form.part(field, multipart::Part::bytes(bytes).file_name(file_name));
    }
    for (name, value) in fields {
        form = form.text(name, value);
    }
    Ok(form)
}
