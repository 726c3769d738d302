//! Typed request headers sent to the authorization server.

use std::fmt;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const AUTHORIZATION: &str = "Authorization";
/// Carries the end user's IP when the token call is made on their behalf.
pub const FORWARDED_FOR: &str = "Auth0-Forwarded-For";

/// Header name + value pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn content_type(content_type: impl Into<String>) -> Self {
        Self::new(CONTENT_TYPE, content_type)
    }

    /// `Authorization: Bearer <token>`
    pub fn bearer(token: &str) -> Self {
        Self::new(AUTHORIZATION, format!("Bearer {token}"))
    }

    pub fn forwarded_for(ip_address: impl Into<String>) -> Self {
        Self::new(FORWARDED_FOR, ip_address)
    }

    fn is_sensitive(&self) -> bool {
        self.name.eq_ignore_ascii_case(AUTHORIZATION)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = if self.is_sensitive() {
            "[REDACTED]"
        } else {
            self.value.as_str()
        };
        f.debug_struct("Header")
            .field("name", &self.name)
            .field("value", &value)
            .finish()
    }
}
