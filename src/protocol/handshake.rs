//! Client side of the WebSocket opening handshake (RFC 6455 Section 4).
//!
//! The client writes a GET upgrade request carrying a random
//! `Sec-WebSocket-Key` and expects `101 Switching Protocols` with the matching
//! `Sec-WebSocket-Accept` value.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::config::Target;
use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Value sent in the `User-Agent` header.
pub const USER_AGENT: &str = concat!("wsload/", env!("CARGO_PKG_VERSION"));

/// Computes the Sec-WebSocket-Accept value for a Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsload::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a fresh `Sec-WebSocket-Key`: Base64 of 16 random bytes.
///
/// # Errors
///
/// Returns `Error::Io` if the operating system RNG is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(e.to_string()))?;
    Ok(BASE64.encode(nonce))
}

/// Position just past the blank line ending an HTTP header block.
#[must_use]
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn validate_header_value(header: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Upgrade request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Request target (path and query).
    pub resource: String,
    /// Value of the Host header.
    pub host: String,
    /// Sec-WebSocket-Key.
    pub key: String,
    /// Additional headers, written in order after the required ones.
    pub extra_headers: Vec<(String, String)>,
}

impl ClientRequest {
    /// Request for `target` with the given key.
    #[must_use]
    pub fn new(target: &Target, key: impl Into<String>) -> Self {
        Self {
            resource: target.resource().to_string(),
            host: target.host_header().to_string(),
            key: key.into(),
            extra_headers: vec![("User-Agent".to_string(), USER_AGENT.to_string())],
        }
    }

    /// Write the HTTP request to a buffer.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if any value contains CR or LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        validate_header_value("Request-Target", &self.resource)?;
        validate_header_value("Host", &self.host)?;
        validate_header_value("Sec-WebSocket-Key", &self.key)?;

        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.resource).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
        for (name, value) in &self.extra_headers {
            validate_header_value(name, name)?;
            validate_header_value(name, value)?;
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// Parsed server response to the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code. Always 101 for a successfully parsed response.
    pub status: u16,
    headers: HashMap<String, String>,
}

impl HandshakeResponse {
    /// Parse the status line and headers of a response.
    ///
    /// # Errors
    ///
    /// - `Error::UnexpectedStatus` if the status is not 101
    /// - `Error::InvalidHandshake` if the response is not valid HTTP/1.1
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid status line: {status_line}"
            )));
        }
        let status: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::InvalidHandshake(format!("Invalid status line: {status_line}")))?;
        let reason = parts.next().unwrap_or_default().trim().to_string();

        if status != 101 {
            return Err(Error::UnexpectedStatus { status, reason });
        }

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self { status, headers })
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Check Upgrade, Connection and Sec-WebSocket-Accept against `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` naming the first header that is
    /// missing or wrong.
    pub fn verify(&self, key: &str) -> Result<()> {
        let upgrade = self
            .header("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {upgrade}"
            )));
        }

        let connection = self.header("connection").ok_or_else(|| {
            Error::InvalidHandshake("Missing Connection header in response".into())
        })?;
        if !connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {connection}"
            )));
        }

        let accept = self
            .header("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?;
        if accept != compute_accept_key(key) {
            return Err(Error::InvalidHandshake(
                "Sec-WebSocket-Accept does not match key".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn ok_response(accept: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn test_compute_accept_key_rfc_example() {
        assert_eq!(compute_accept_key(KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_generate_key_is_16_bytes_base64() {
        let key = generate_key().unwrap();
        assert_eq!(BASE64.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key().unwrap());
    }

    #[test]
    fn test_request_write() {
        let target = Target::parse("ws://example.com:9000/chat?room=1").unwrap();
        let mut buf = Vec::new();
        ClientRequest::new(&target, KEY).write(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:9000\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains(&format!("Sec-WebSocket-Key: {KEY}\r\n")));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_crlf_in_header_rejected() {
        let target = Target::parse("ws://localhost:8583").unwrap();
        let mut request = ClientRequest::new(&target, KEY);
        request
            .extra_headers
            .push(("X-Test".into(), "a\r\nInjected: yes".into()));
        let result = request.write(&mut Vec::new());
        assert!(matches!(result, Err(Error::InvalidHeaderValue { .. })));
    }

    #[test]
    fn test_parse_and_verify_response() {
        let response = HandshakeResponse::parse(&ok_response(&compute_accept_key(KEY))).unwrap();
        assert_eq!(response.status, 101);
        assert_eq!(response.header("UPGRADE"), Some("websocket"));
        assert!(response.verify(KEY).is_ok());
    }

    #[test]
    fn test_wrong_accept_rejected() {
        let response = HandshakeResponse::parse(&ok_response("bm90LXRoZS1rZXk=")).unwrap();
        assert!(matches!(
            response.verify(KEY),
            Err(Error::InvalidHandshake(_))
        ));
    }

    #[test]
    fn test_non_101_status() {
        let data = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(
            HandshakeResponse::parse(data),
            Err(Error::UnexpectedStatus {
                status: 404,
                reason: "Not Found".into(),
            })
        );
    }

    #[test]
    fn test_garbage_status_line() {
        assert!(matches!(
            HandshakeResponse::parse(b"SSH-2.0-OpenSSH\r\n\r\n"),
            Err(Error::InvalidHandshake(_))
        ));
        assert!(matches!(
            HandshakeResponse::parse(b""),
            Err(Error::InvalidHandshake(_))
        ));
    }

    #[test]
    fn test_connection_header_token_list() {
        let data = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             upgrade: WebSocket\r\n\
             connection: keep-alive, Upgrade\r\n\
             sec-websocket-accept: {}\r\n\r\n",
            compute_accept_key(KEY)
        );
        let response = HandshakeResponse::parse(data.as_bytes()).unwrap();
        assert!(response.verify(KEY).is_ok());
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"HTTP/1.1 101 X\r\n\r\n\x81\x00"), Some(18));
        assert_eq!(find_header_end(b"HTTP/1.1 101 X\r\n"), None);
    }
}
