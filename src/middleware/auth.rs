//! Token extraction and verification. No database access here; the
//! pipeline re-checks every claim against the authoritative store.

use axum::http::HeaderMap;

use crate::auth::{verify_jwt, Claims};
use crate::cookies;
use crate::error::ApiError;

/// Pull the access token off the request and verify it.
///
/// Precedence: the `access_token` cookie, then `Authorization: Bearer`.
/// `Ok(None)` means no credential was presented at all; a presented but
/// malformed/expired credential is an error.
pub fn authenticate(headers: &HeaderMap) -> Result<Option<Claims>, ApiError> {
    let token = match extract_token(headers)? {
        Some(token) => token,
        None => return Ok(None),
    };

    verify_jwt(&token)
        .map(Some)
        .map_err(|_| ApiError::unauthenticated("Invalid or expired token"))
}

fn extract_token(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    if let Some(token) = cookies::read_cookie(headers, cookies::ACCESS_TOKEN_COOKIE) {
        return Ok(Some(token));
    }

    let auth_header = match headers
        .get("authorization")
        .or_else(|| headers.get("Authorization"))
    {
        Some(value) => value,
        None => return Ok(None),
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| ApiError::unauthenticated("Invalid Authorization header"))?;

    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthenticated("Authorization header must use Bearer format"))?
        .trim();

    if token.is_empty() {
        return Err(ApiError::unauthenticated("Empty bearer token"));
    }
    Ok(Some(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn cookie_takes_precedence_over_bearer() {
        let map = headers(&[
            ("cookie", "access_token=from-cookie"),
            ("authorization", "Bearer from-header"),
        ]);
        assert_eq!(
            extract_token(&map).unwrap().as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn falls_back_to_bearer_header() {
        let map = headers(&[("authorization", "Bearer abc123")]);
        assert_eq!(extract_token(&map).unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn no_credential_is_none() {
        assert_eq!(extract_token(&HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn malformed_authorization_is_an_error() {
        let map = headers(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert!(extract_token(&map).is_err());

        let empty = headers(&[("authorization", "Bearer   ")]);
        assert!(extract_token(&empty).is_err());
    }
}
