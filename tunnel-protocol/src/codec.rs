//! # Body codec
//!
//! The text-like/base64 rule used identically by the relay (encoding an
//! outbound `httpRequest`, decoding an inbound `httpResponse`) and the agent
//! (decoding an inbound `httpRequest`, encoding an outbound `httpResponse`).
//!
//! Rule (spec §4.6.4, §9): if the declared content-type is text-like
//! (`text/*`, `*/json`, `*/xml`, `application/x-www-form-urlencoded`) the
//! body travels as the raw UTF-8 string. Otherwise — including when the
//! content-type is absent or unrecognized — the body travels as base64 of
//! the exact bytes, so byte equality is guaranteed even when we can't
//! classify the content.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Returns whether a content-type should be treated as text for wire
/// encoding purposes.
pub fn is_text_like(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let ct = ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase();
    ct.starts_with("text/")
        || ct.ends_with("/json")
        || ct.contains("+json")
        || ct.ends_with("/xml")
        || ct.contains("+xml")
        || ct == "application/x-www-form-urlencoded"
}

/// Encodes a body for the wire, returning `(body, body_is_base64)`.
/// `bytes` empty is encoded as `None` (§4.6.4: "Bodies absent ... are null").
pub fn encode_body(bytes: &[u8], content_type: Option<&str>) -> (Option<String>, bool) {
    if bytes.is_empty() {
        return (None, false);
    }
    if is_text_like(content_type) {
        match std::str::from_utf8(bytes) {
            Ok(s) => (Some(s.to_string()), false),
            Err(_) => (Some(BASE64.encode(bytes)), true),
        }
    } else {
        (Some(BASE64.encode(bytes)), true)
    }
}

/// Decodes a wire body back into bytes. If `body_is_base64` is set but the
/// string fails to decode, falls back to the raw UTF-8 bytes of the string
/// rather than rejecting the message (§4.10: "never reject the request for
/// this reason alone").
pub fn decode_body(body: Option<&str>, body_is_base64: bool) -> Vec<u8> {
    let Some(body) = body else {
        return Vec::new();
    };
    if body_is_base64 {
        match BASE64.decode(body) {
            Ok(bytes) => bytes,
            Err(_) => body.as_bytes().to_vec(),
        }
    } else {
        body.as_bytes().to_vec()
    }
}

/// `true` when a status code never carries a body (§4.6.4: "Bodies absent
/// or of status 204/304 are null").
pub fn status_is_bodyless(status: u16) -> bool {
    matches!(status, 204 | 304)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_like_classification() {
        assert!(is_text_like(Some("text/plain")));
        assert!(is_text_like(Some("application/json; charset=utf-8")));
        assert!(is_text_like(Some("application/xml")));
        assert!(is_text_like(Some("application/x-www-form-urlencoded")));
        assert!(!is_text_like(Some("application/octet-stream")));
        assert!(!is_text_like(None));
    }

    #[test]
    fn round_trips_text_body() {
        let (body, b64) = encode_body(b"hi", Some("text/plain"));
        assert!(!b64);
        assert_eq!(decode_body(body.as_deref(), b64), b"hi".to_vec());
    }

    #[test]
    fn round_trips_binary_body_via_base64() {
        let bytes = [0x89u8, 0x50, 0x4E];
        let (body, b64) = encode_body(&bytes, Some("application/octet-stream"));
        assert!(b64);
        assert_eq!(body.as_deref(), Some("iVBO"));
        assert_eq!(decode_body(body.as_deref(), b64), bytes.to_vec());
    }

    #[test]
    fn unrecognized_content_type_uses_base64() {
        let (body, b64) = encode_body(b"hello", None);
        assert!(b64);
        assert_eq!(decode_body(body.as_deref(), b64), b"hello".to_vec());
    }

    #[test]
    fn failed_base64_decode_falls_back_to_raw_text() {
        let decoded = decode_body(Some("not-base64!!"), true);
        assert_eq!(decoded, b"not-base64!!".to_vec());
    }

    #[test]
    fn empty_body_encodes_to_none() {
        let (body, b64) = encode_body(b"", Some("text/plain"));
        assert_eq!(body, None);
        assert!(!b64);
    }
}
