//! Auth cookie plumbing. Values are built and parsed by hand against the
//! `Cookie` / `Set-Cookie` headers; both cookies are HttpOnly and scoped
//! by the configured domain and SameSite mode.

use axum::http::HeaderMap;

use crate::config;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Build a `Set-Cookie` header value for an auth cookie.
pub fn auth_cookie(name: &str, value: &str, max_age_ms: i64) -> String {
    let cfg = &config::config().cookies;
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}",
        name,
        value,
        cfg.same_site,
        max_age_ms / 1000
    );
    if let Some(domain) = &cfg.domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if cfg.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build a `Set-Cookie` header value that expires a cookie immediately.
pub fn clear_cookie(name: &str) -> String {
    auth_cookie(name, "", 0)
}

pub fn clear_auth_cookies() -> [String; 2] {
    [
        clear_cookie(ACCESS_TOKEN_COOKIE),
        clear_cookie(REFRESH_TOKEN_COOKIE),
    ]
}

/// Read a single cookie value out of the request's `Cookie` header.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get("Cookie")?.to_str().ok()?;
    for pair in cookie_header.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(name) {
            let value = parts.next()?.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(raw: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Cookie", HeaderValue::from_str(raw).unwrap());
        headers
    }

    #[test]
    fn reads_named_cookie_among_many() {
        let headers = headers_with_cookie("session=abc; access_token=tok123; theme=dark");
        assert_eq!(
            read_cookie(&headers, ACCESS_TOKEN_COOKIE).as_deref(),
            Some("tok123")
        );
    }

    #[test]
    fn missing_or_empty_cookie_is_none() {
        let headers = headers_with_cookie("access_token=; other=x");
        assert_eq!(read_cookie(&headers, ACCESS_TOKEN_COOKIE), None);
        assert_eq!(read_cookie(&headers, REFRESH_TOKEN_COOKIE), None);
    }
}
