//! WebSocket HTTP upgrade handshake per RFC 6455.

use crate::error::{WsError, WsResult};
use base64::Engine;
use sha1::{Digest, Sha1};

/// WebSocket magic GUID for Sec-WebSocket-Accept calculation.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Extract the `Sec-WebSocket-Key` value from a raw upgrade request.
///
/// The header name is matched case-insensitively and the value trimmed. The
/// header must appear exactly once; on failure the caller drops the
/// connection without a response.
///
/// # Errors
///
/// Returns an error if the request is not UTF-8 or the key header is absent
/// or duplicated.
pub fn extract_key(request: &[u8]) -> WsResult<String> {
    let text = std::str::from_utf8(request)
        .map_err(|_| WsError::MalformedHandshake("request is not valid UTF-8".to_string()))?;

    let mut key = None;
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("sec-websocket-key") {
            if key.is_some() {
                return Err(WsError::MalformedHandshake(
                    "duplicate Sec-WebSocket-Key header".to_string(),
                ));
            }
            key = Some(value.trim().to_string());
        }
    }

    key.ok_or_else(|| WsError::MalformedHandshake("missing Sec-WebSocket-Key header".to_string()))
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Build the `101 Switching Protocols` response for a client key.
///
/// The response is byte-exact: four CRLF-terminated header lines and a
/// trailing blank line, nothing else.
pub fn response(key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(key)
    )
    .into_bytes()
}
