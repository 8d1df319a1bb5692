//! HTTP Basic authentication gating (spec §4.H, scenario 3). New module —
//! the teacher has no auth layer of its own; built directly against
//! `http::HeaderMap` and the base64 decoding `hyper`'s dependency tree
//! already pulls in transitively is avoided in favor of a minimal
//! hand-rolled decode, since no crate in the corpus exposes base64
//! directly as a first-class dependency.

use crate::config::BasicAuth;
use http::HeaderMap;

/// Checks the `Authorization` header against `auth`. Returns `true` when
/// credentials are absent or malformed as well as when they mismatch —
/// callers must check both the boolean and, if forwarding, strip the
/// header per [`strip_if_not_forwarded`].
pub fn check(headers: &HeaderMap, auth: &BasicAuth) -> bool {
    let Some(value) = headers.get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Some(decoded) = decode_base64(encoded) else {
        return false;
    };
    let Ok(text) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, pass)) = text.split_once(':') else {
        return false;
    };
    user == auth.user && pass == auth.pass
}

/// Basic-Auth credentials must never reach the upstream unless
/// `forward` is explicitly set (spec §4.H "never forwarded unless...").
pub fn strip_if_not_forwarded(headers: &mut HeaderMap, auth: &BasicAuth) {
    if !auth.forward {
        headers.remove(http::header::AUTHORIZATION);
    }
}

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4 + 1);
    let mut buf = 0u32;
    let mut bits = 0u32;
    for c in input.bytes() {
        let val = ALPHABET.iter().position(|&b| b == c)? as u32;
        buf = (buf << 6) | val;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buf >> bits) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> BasicAuth {
        BasicAuth { user: "a".to_string(), pass: "b".to_string(), forward: false }
    }

    #[test]
    fn accepts_correct_credentials() {
        let mut headers = HeaderMap::new();
        // base64("a:b") == "YTpi", matching spec §8 scenario 3.
        headers.insert(http::header::AUTHORIZATION, "Basic YTpi".parse().unwrap());
        assert!(check(&headers, &auth()));
    }

    #[test]
    fn rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(!check(&headers, &auth()));
    }

    #[test]
    fn rejects_wrong_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, "Basic d3Jvbmc6Y3JlZHM=".parse().unwrap());
        assert!(!check(&headers, &auth()));
    }

    #[test]
    fn strips_header_when_not_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, "Basic YTpi".parse().unwrap());
        strip_if_not_forwarded(&mut headers, &auth());
        assert!(headers.get(http::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn keeps_header_when_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, "Basic YTpi".parse().unwrap());
        let mut forwarding_auth = auth();
        forwarding_auth.forward = true;
        strip_if_not_forwarded(&mut headers, &forwarding_auth);
        assert!(headers.get(http::header::AUTHORIZATION).is_some());
    }
}
