//! HTTP response returned from an upgrade exchange.

use crate::base::neterror::NetError;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};

/// Transport-level result of the upgrade request.
///
/// A `101 Switching Protocols` carries no body. Any other status is an
/// application-level answer (404, 401, 500 ...) whose body has already been
/// read off the wire, so the connection could go back to the pool.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, version: Version::HTTP_11, headers, body: Bytes::new() }
    }

    /// Create from response parts and an already collected body.
    pub fn from_parts(parts: http::response::Parts, body: Bytes) -> Self {
        Self { status: parts.status, version: parts.version, headers: parts.headers, body }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Numeric status code.
    pub fn code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|_| NetError::HttpBodyError)
    }
}

impl From<http::Response<Bytes>> for HttpResponse {
    fn from(resp: http::Response<Bytes>) -> Self {
        let (parts, body) = resp.into_parts();
        Self::from_parts(parts, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let resp: HttpResponse = http::Response::builder()
            .status(101)
            .header("Upgrade", "websocket")
            .body(Bytes::new())
            .unwrap()
            .into();

        assert_eq!(resp.code(), 101);
        assert_eq!(resp.header("upgrade"), Some("websocket"));
        assert_eq!(resp.header("UPGRADE"), Some("websocket"));
        assert_eq!(resp.header("Connection"), None);
    }

    #[test]
    fn test_body_text() {
        let resp = HttpResponse::new(StatusCode::NOT_FOUND, HeaderMap::new()).with_body("missing");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.text().unwrap(), "missing");
    }
}
