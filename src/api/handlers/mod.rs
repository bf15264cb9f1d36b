pub(crate) mod auth;
pub(crate) mod health;

use axum::response::IntoResponse;

// Undocumented banner for the bare origin.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
