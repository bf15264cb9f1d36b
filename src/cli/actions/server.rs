use crate::api;
use crate::cli::actions::Action;
use anyhow::Result;

/// Execute the server action.
/// # Errors
/// Returns an error if configuration is unusable or the server fails to start.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        dsn,
        session_secret,
        admin_password_hash,
        frontend_base_url,
        rate_limit_fail_closed,
    } = action;

    let auth_config = api::AuthConfig::new(frontend_base_url)
        .with_rate_limit_fail_open(!rate_limit_fail_closed);

    api::new(port, dsn, session_secret, admin_password_hash, auth_config).await
}
