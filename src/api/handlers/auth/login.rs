//! Admin login and logout endpoints.
//!
//! Flow Overview:
//! 1) Rate-limit check before the password is even looked at.
//! 2) Verify the password, then record the outcome either way.
//! 3) On success mint a session token and set the admin cookie.
//!
//! A failed password costs the caller a fixed delay on top of the tally, so
//! automated guessing is slow even before the limiter blocks.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use super::{
    codec,
    rate_limit::login_identifier,
    session::{clear_session_cookie, session_cookie},
    state::AuthState,
    types::{LoginBlocked, LoginRejected, LoginRequest, LoginResponse, LogoutResponse},
    utils::{extract_client_ip, extract_user_agent},
};

const UNKNOWN_CLIENT: &str = "unknown";

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated; session cookie set", body = LoginResponse),
        (status = 400, description = "Missing payload", body = String),
        (status = 401, description = "Wrong password", body = LoginRejected),
        (status = 429, description = "Too many attempts", body = LoginBlocked),
        (status = 500, description = "Internal error", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip =
        extract_client_ip(&headers).unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    let identifier = login_identifier(&client_ip);

    // Blocked identifiers are rejected before the password is examined, so a
    // correct guess during the cooldown buys nothing.
    let outcome = auth_state.limiter().check(&identifier).await;
    if !outcome.allowed {
        let blocked_until = outcome
            .blocked_until
            .and_then(|until| codec::format_timestamp(until).ok());
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(LoginBlocked {
                error: "Too many login attempts".to_string(),
                blocked_until,
                remaining_attempts: 0,
            }),
        )
            .into_response();
    }

    let password_ok = auth_state.verify_password(&request.password);
    auth_state.limiter().record(&identifier, password_ok).await;

    if !password_ok {
        // Throttle, not timeout: a flat cost per wrong password.
        sleep(Duration::from_millis(
            auth_state.config().failed_login_delay_ms(),
        ))
        .await;
        let remaining = (outcome.remaining_attempts - 1).max(0);
        return (
            StatusCode::UNAUTHORIZED,
            Json(LoginRejected {
                error: "Invalid password".to_string(),
                remaining_attempts: remaining,
            }),
        )
            .into_response();
    }

    let user_agent = extract_user_agent(&headers);
    let issued = match auth_state
        .tokens()
        .issue(Some(&client_ip), user_agent.as_deref())
    {
        Ok(issued) => issued,
        Err(err) => {
            error!("Failed to issue session token: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
                .into_response();
        }
    };

    let expires_at = match codec::format_timestamp(issued.session.expires_at) {
        Ok(expires_at) => expires_at,
        Err(err) => {
            error!("Failed to format session expiry: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
                .into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &issued.token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
                .into_response();
        }
    }

    info!(session_id = %issued.session.session_id, "Admin login");
    (
        StatusCode::OK,
        response_headers,
        Json(LoginResponse {
            session_id: issued.session.session_id,
            expires_at,
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Cookie cleared; idempotent", body = LogoutResponse)
    ),
    tag = "auth"
)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    // There is nothing server-side to revoke; clearing the client's copy of
    // the token IS the logout. Always succeeds.
    let mut response_headers = HeaderMap::new();
    match clear_session_cookie(auth_state.config()) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build logout cookie: {err}"),
    }
    (
        StatusCode::OK,
        response_headers,
        Json(LogoutResponse {
            message: "Logged out".to_string(),
        }),
    )
}
