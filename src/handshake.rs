//! # Handshake
//!
//! Helpers for the HTTP/1.1 upgrade that opens a WebSocket connection,
//! [RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4).
//!
//! Nothing here performs I/O. A client builds its request with [`client_request`], sends it with
//! the HTTP stack of its choice and checks the answer with [`verify_response`]. A server checks
//! the request and builds its answer with [`server_response`]. Once the upgrade is done, the raw
//! connection is handed to [`WebSocket`](crate::WebSocket).
//!
//! ```rust
//! use wsduplex::handshake;
//!
//! let url = "ws://localhost:9001/chat".parse()?;
//! let (request, key) = handshake::client_request(&url)?;
//!
//! let response = handshake::server_response(&request)?;
//! handshake::verify_response(&response, &key)?;
//! # Ok::<_, wsduplex::WebSocketError>(())
//! ```
use base64::prelude::*;
use http::{header, HeaderMap, Request, Response, StatusCode};
use sha1::{Digest, Sha1};
use url::Url;

use crate::{Result, WebSocketError};

/// Appended to the client key before hashing.
const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derives the `Sec-WebSocket-Accept` value for a `Sec-WebSocket-Key`.
///
/// `base64(SHA-1(key + GUID))`
pub fn accept_key(key: impl AsRef<[u8]>) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_ref());
    sha1.update(GUID);
    let result = sha1.finalize();
    BASE64_STANDARD.encode(&result[..])
}

/// Generates a `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Builds the upgrade request for `url`.
///
/// Returns the request along with the generated key, which is needed to verify the response.
/// `http` and `https` are accepted as aliases of `ws` and `wss`.
pub fn client_request(url: &Url) -> Result<(Request<()>, String)> {
    if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
        return Err(WebSocketError::InvalidHttpScheme);
    }

    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let key = generate_key();
    let request = Request::builder()
        .method("GET")
        .uri(&url[url::Position::BeforePath..])
        .header(header::HOST, host_header)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_KEY, key.as_str())
        .header(header::SEC_WEBSOCKET_VERSION, "13")
        .body(())?;

    Ok((request, key))
}

/// Validates an upgrade request and builds the `101 Switching Protocols` response.
pub fn server_response<B>(request: &Request<B>) -> Result<Response<()>> {
    let headers = request.headers();

    if !has_token(headers, header::UPGRADE, "websocket") {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    if !has_token(headers, header::CONNECTION, "upgrade") {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    if headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(|v| v.as_bytes())
        != Some(b"13")
    {
        return Err(WebSocketError::InvalidSecWebsocketVersion);
    }

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(WebSocketError::MissingSecWebSocketKey)?;

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept_key(key.as_bytes()))
        .body(())?;

    Ok(response)
}

/// Checks the server's answer to a request built with `key`.
pub fn verify_response<B>(response: &Response<B>, key: &str) -> Result<()> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(WebSocketError::InvalidStatusCode(
            response.status().as_u16(),
        ));
    }

    let headers = response.headers();

    if !has_token(headers, header::UPGRADE, "websocket") {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    if !has_token(headers, header::CONNECTION, "upgrade") {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    let accept = headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .ok_or(WebSocketError::InvalidAcceptKey)?;
    if accept.as_bytes() != accept_key(key).as_bytes() {
        return Err(WebSocketError::InvalidAcceptKey);
    }

    Ok(())
}

/// Whether the comma separated header `name` contains `token`, ignoring case.
fn has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}
