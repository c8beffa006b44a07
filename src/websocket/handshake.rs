//! The RFC 6455 opening handshake, server side.

use core::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use heapless::String;
use sha1::{Digest, Sha1};

use crate::request_head::RequestHead;
use crate::{Error, Result};

/// Fixed GUID appended to the client's key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Base64 of a 20-byte SHA-1 digest is always 28 characters.
pub const ACCEPT_KEY_LEN: usize = 28;

pub type AcceptKey = String<ACCEPT_KEY_LEN>;

/// Room for the `101 Switching Protocols` response.
pub type UpgradeResponse = String<160>;

/// Extract `Sec-WebSocket-Key` from an upgrade request. The request path is not checked;
/// the handshake is accepted on any path.
///
/// # Errors
/// Returns [`Error::MissingWebSocketKey`] if the header is absent or empty.
pub fn client_key<'a>(head: &RequestHead<'a>) -> Result<&'a str> {
    head.header("Sec-WebSocket-Key")
        .filter(|key| !key.is_empty())
        .ok_or(Error::MissingWebSocketKey)
}

/// Compute `Sec-WebSocket-Accept`: base64(SHA-1(key + GUID)).
#[must_use]
pub fn accept_key(client_key: &str) -> AcceptKey {
    let digest = Sha1::new()
        .chain_update(client_key.as_bytes())
        .chain_update(WEBSOCKET_GUID.as_bytes())
        .finalize();

    let mut encoded = [0u8; ACCEPT_KEY_LEN];
    let mut accept = AcceptKey::new();
    if let Ok(len) = STANDARD.encode_slice(digest, &mut encoded) {
        let text = encoded
            .get(..len)
            .and_then(|bytes| core::str::from_utf8(bytes).ok())
            .unwrap_or_default();
        // Cannot fail: base64 of 20 bytes is exactly `ACCEPT_KEY_LEN` characters.
        let _ = accept.push_str(text);
    }
    accept
}

/// Write the `101 Switching Protocols` response carrying `accept`.
///
/// # Errors
/// Returns [`Error::BufferTooSmall`] if the response does not fit.
pub fn write_upgrade_response(accept: &str, out: &mut UpgradeResponse) -> Result<()> {
    out.clear();
    write!(
        out,
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
    .map_err(|_| Error::BufferTooSmall)
}
