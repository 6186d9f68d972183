#![forbid(unsafe_code)]

//! Header-level cookie access. Cookies are the proxy's only per-session
//! state; a missing or unreadable cookie always reads as absent.

use http::header::{self, HeaderMap, HeaderValue};

/// The value of the named cookie, searched across all `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Append a `Set-Cookie` header, skipping values that cannot be encoded.
pub fn append_set_cookie(headers: &mut HeaderMap, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        headers.append(header::SET_COOKIE, value);
    }
}
