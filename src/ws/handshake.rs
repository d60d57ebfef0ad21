//! Opening handshake: upgrade request construction and response validation.

use super::{fill_random, SharedRandom};
use crate::base::neterror::NetError;
use crate::http::response::HttpResponse;
use base64::prelude::*;
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::uri::Scheme;
use http::{HeaderValue, Method, Request, Uri};
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the key before hashing (RFC 6455 section 1.3).
pub const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(SHA1(key + GUID))`, the value a server must echo back.
pub fn accept_digest(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(ACCEPT_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Nonce, request key and expected accept digest of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeKey {
    nonce: [u8; 16],
    key: String,
    expected_accept: String,
}

impl HandshakeKey {
    pub fn generate(random: &SharedRandom) -> Self {
        let mut nonce = [0u8; 16];
        fill_random(random, &mut nonce);
        Self::from_nonce(nonce)
    }

    pub fn from_nonce(nonce: [u8; 16]) -> Self {
        let key = BASE64_STANDARD.encode(nonce);
        let expected_accept = accept_digest(&key);
        Self { nonce, key, expected_accept }
    }

    pub fn nonce(&self) -> &[u8; 16] {
        &self.nonce
    }

    /// `Sec-WebSocket-Key` header value.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn expected_accept(&self) -> &str {
        &self.expected_accept
    }
}

/// Turn a `GET ws(s)://` request into the HTTP upgrade request.
///
/// The scheme becomes `http`/`https` and the four upgrade headers are set;
/// everything else about the request is left alone.
pub fn build_upgrade_request(request: Request<()>, key: &HandshakeKey) -> Result<Request<()>, NetError> {
    if request.method() != Method::GET {
        return Err(NetError::InvalidArgument(format!("Request must be GET: {}", request.method())));
    }

    let (mut parts, ()) = request.into_parts();
    let scheme = match parts.uri.scheme_str() {
        Some(s) if s.eq_ignore_ascii_case("ws") => Scheme::HTTP,
        Some(s) if s.eq_ignore_ascii_case("wss") => Scheme::HTTPS,
        _ => {
            return Err(NetError::InvalidArgument(format!(
                "Request url must use 'ws' or 'wss' scheme: {}",
                parts.uri
            )));
        }
    };
    let mut uri = parts.uri.into_parts();
    uri.scheme = Some(scheme);
    parts.uri = Uri::from_parts(uri).map_err(|e| NetError::InvalidArgument(e.to_string()))?;

    let key_value = HeaderValue::from_str(key.key()).map_err(|_| NetError::InvalidArgument("Bad key".into()))?;
    parts.headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    parts.headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    parts.headers.insert(SEC_WEBSOCKET_KEY, key_value);
    parts.headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));

    Ok(Request::from_parts(parts, ()))
}

/// Check a `101 Switching Protocols` response against the session key.
pub fn validate_upgrade_response(response: &HttpResponse, key: &HandshakeKey) -> Result<(), NetError> {
    expect_header(response, UPGRADE.as_str(), "websocket")?;
    expect_header(response, CONNECTION.as_str(), "Upgrade")?;

    let accept = response.header(SEC_WEBSOCKET_ACCEPT.as_str()).unwrap_or("");
    if accept != key.expected_accept() {
        return Err(NetError::protocol(format!(
            "Expected 'Sec-WebSocket-Accept' header value '{}' but was '{}'",
            key.expected_accept(),
            accept
        )));
    }
    Ok(())
}

fn expect_header(response: &HttpResponse, name: &str, expected: &str) -> Result<(), NetError> {
    match response.header(name) {
        Some(value) if value.eq_ignore_ascii_case(expected) => Ok(()),
        value => Err(NetError::protocol(format!(
            "Expected '{name}' header value '{expected}' but was '{}'",
            value.unwrap_or("null")
        ))),
    }
}

/// Copy of a body-less request. `http::Request` is not `Clone`.
pub(crate) fn clone_request(request: &Request<()>) -> Request<()> {
    let mut copy = Request::new(());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    copy
}
