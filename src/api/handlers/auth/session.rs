//! Session verification endpoint and cookie plumbing.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error};

use super::{
    codec,
    state::{AuthConfig, AuthState},
    token::Session,
    types::SessionStatusResponse,
    utils::{extract_client_ip, extract_user_agent},
};

const ADMIN_COOKIE_NAME: &str = "admin-token";

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is valid; cookie re-set when a refresh was warranted", body = SessionStatusResponse),
        (status = 401, description = "Missing, invalid, or expired session; cookie cleared")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let config = auth_state.config();
    // A missing cookie and a bad token get the same answer, so the response
    // never doubles as an oracle for why a token was rejected.
    let Some(token) = extract_session_token(&headers) else {
        return unauthenticated(config);
    };

    let client_ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    let now = OffsetDateTime::now_utc();

    let mut session = match auth_state.tokens().verify_at(
        &token,
        now,
        client_ip.as_deref(),
        user_agent.as_deref(),
    ) {
        Ok(session) => session,
        Err(err) => {
            debug!("Rejected session token: {err}");
            return unauthenticated(config);
        }
    };

    let idle = now - session.last_activity;
    let needs_refresh = idle >= Duration::seconds(config.refresh_after_seconds())
        || session.expires_at - now <= Duration::seconds(config.expiring_soon_seconds());

    let mut response_headers = HeaderMap::new();
    if needs_refresh {
        let Some(refreshed) = auth_state.tokens().refresh_at(
            &token,
            now,
            client_ip.as_deref(),
            user_agent.as_deref(),
        ) else {
            // Verified a moment ago, so this is effectively unreachable;
            // treat it like any other invalid token.
            return unauthenticated(config);
        };
        match session_cookie(config, &refreshed.token) {
            Ok(cookie) => {
                response_headers.insert(SET_COOKIE, cookie);
            }
            Err(err) => {
                error!("Failed to build session cookie: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
        session = refreshed.session;
    }

    let body = match status_body(&session, now, needs_refresh, config) {
        Ok(body) => body,
        Err(err) => {
            error!("Failed to encode session status: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    (StatusCode::OK, response_headers, Json(body)).into_response()
}

fn status_body(
    session: &Session,
    now: OffsetDateTime,
    needs_refresh: bool,
    config: &AuthConfig,
) -> Result<SessionStatusResponse, codec::TokenError> {
    let time_until_expiry = session.expires_at - now;
    Ok(SessionStatusResponse {
        is_valid: true,
        session_id: session.session_id.clone(),
        expires_at: codec::format_timestamp(session.expires_at)?,
        last_activity: codec::format_timestamp(session.last_activity)?,
        time_until_expiry_seconds: time_until_expiry.whole_seconds(),
        is_expiring_soon: time_until_expiry
            <= Duration::seconds(config.expiring_soon_seconds()),
        needs_refresh,
    })
}

/// `401` with the cookie cleared, shared by every rejection path.
pub(super) fn unauthenticated(config: &AuthConfig) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(config) {
        headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::UNAUTHORIZED, headers).into_response()
}

/// Build the `HttpOnly` session cookie for `token`.
pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let secure = config.session_cookie_secure();
    let mut cookie = format!(
        "{ADMIN_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_session_cookie(
    config: &AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = config.session_cookie_secure();
    let mut cookie =
        format!("{ADMIN_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Pull the session token from the bearer header or the admin cookie.
pub(super) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == ADMIN_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new("http://localhost:3000".to_string())
    }

    #[test]
    fn session_cookie_carries_the_expected_attributes() -> Result<(), InvalidHeaderValue> {
        let cookie = session_cookie(&config(), "tok")?;
        let value = cookie.to_str().unwrap_or_default();
        assert!(value.starts_with("admin-token=tok"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Strict"));
        assert!(value.contains("Max-Age=86400"));
        assert!(!value.contains("Secure"));
        Ok(())
    }

    #[test]
    fn session_cookie_is_secure_behind_https() -> Result<(), InvalidHeaderValue> {
        let config = AuthConfig::new("https://example.dev".to_string());
        let cookie = session_cookie(&config, "tok")?;
        assert!(cookie.to_str().unwrap_or_default().ends_with("; Secure"));
        Ok(())
    }

    #[test]
    fn clear_cookie_zeroes_the_max_age() -> Result<(), InvalidHeaderValue> {
        let cookie = clear_session_cookie(&config())?;
        let value = cookie.to_str().unwrap_or_default();
        assert!(value.starts_with("admin-token=;"));
        assert!(value.contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn extract_prefers_bearer_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(
            COOKIE,
            HeaderValue::from_static("admin-token=from-cookie; theme=dark"),
        );
        assert_eq!(
            extract_session_token(&headers),
            Some("from-header".to_string())
        );
    }

    #[test]
    fn extract_finds_the_admin_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; admin-token=tok; lang=en"),
        );
        assert_eq!(extract_session_token(&headers), Some("tok".to_string()));
    }

    #[test]
    fn extract_returns_none_without_a_token() {
        assert_eq!(extract_session_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(extract_session_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_session_token(&headers), None);
    }
}
