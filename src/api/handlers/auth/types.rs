//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub session_id: String,
    pub expires_at: String,
}

/// Body of a `401` after a wrong password.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRejected {
    pub error: String,
    pub remaining_attempts: i64,
}

/// Body of a `429` while an identifier is blocked. `blocked_until` is
/// deliberately exposed so the UI can show a countdown.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginBlocked {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<String>,
    pub remaining_attempts: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionStatusResponse {
    pub is_valid: bool,
    pub session_id: String,
    pub expires_at: String,
    pub last_activity: String,
    pub time_until_expiry_seconds: i64,
    pub is_expiring_soon: bool,
    pub needs_refresh: bool,
}
