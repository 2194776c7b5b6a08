//! Bearer authentication for the `/sync` endpoint.
//!
//! WebSocket clients that cannot set headers pass the token as the
//! `access_token` query parameter instead.

use axum::http::{header, HeaderMap};
use boxsync_core::SessionClaims;

use crate::config::HubConfig;
use crate::error::HubError;

/// Query parameter carrying the token for header-less clients.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Extract bearer token from authorization header.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Finds the token in the `Authorization` header, falling back to the query.
pub fn request_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .or(query_token.filter(|token| !token.is_empty()))
}

/// Validates the request's token and returns its claims.
pub fn authenticate(
    config: &HubConfig,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<SessionClaims, HubError> {
    let token = request_token(headers, query_token)
        .ok_or_else(|| HubError::Unauthorized("Missing bearer token".to_string()))?;

    SessionClaims::decode(
        token,
        config.jwt_key.as_bytes(),
        &config.jwt_issuer,
        &config.jwt_audience,
    )
    .map_err(|e| HubError::Unauthorized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxsync_core::DeviceIdentity;
    use chrono::{Duration, Utc};

    fn config() -> HubConfig {
        HubConfig {
            port: 0,
            bind_addr: "127.0.0.1".into(),
            jwt_key: "hub-key".into(),
            jwt_issuer: "boxsync".into(),
            jwt_audience: "boxsync".into(),
            max_message_size: 1024,
        }
    }

    fn token(key: &str) -> String {
        let identity = DeviceIdentity::new(None, "P1", "d-1", "dr@example.com");
        let now = Utc::now();
        SessionClaims::for_identity(&identity, "boxsync", "boxsync", now, now + Duration::hours(1))
            .unwrap()
            .encode(key.as_bytes())
            .unwrap()
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
    }

    #[test]
    fn test_header_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token("hub-key")).parse().unwrap(),
        );

        let claims = authenticate(&config(), &headers, None).unwrap();
        assert_eq!(claims.tenant(), Some("P1"));
    }

    #[test]
    fn test_query_token() {
        let token = token("hub-key");
        let claims = authenticate(&config(), &HeaderMap::new(), Some(&token)).unwrap();
        assert_eq!(claims.tenant(), Some("P1"));
    }

    #[test]
    fn test_rejects_missing_and_forged_tokens() {
        let err = authenticate(&config(), &HeaderMap::new(), None).unwrap_err();
        assert!(matches!(err, HubError::Unauthorized(_)));

        let forged = token("other-key");
        let err = authenticate(&config(), &HeaderMap::new(), Some(&forged)).unwrap_err();
        assert!(matches!(err, HubError::Unauthorized(_)));
    }
}
