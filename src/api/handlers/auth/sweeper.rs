//! Best-effort cleanup of stale login attempt records.
//!
//! The sweep is not safety-critical: a skipped or doubled run only leaves
//! idle rows around a little longer. Blocking and reset decisions never
//! depend on it.

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::state::AuthState;

/// Spawn the periodic sweep loop for the limiter behind `auth_state`.
pub fn spawn_attempt_sweeper(auth_state: Arc<AuthState>) {
    let interval = Duration::from_secs(auth_state.config().sweep_interval_seconds());
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match auth_state
                .limiter()
                .sweep_stale(OffsetDateTime::now_utc())
                .await
            {
                Ok(0) => {}
                Ok(removed) => debug!("Swept {removed} stale login attempt records"),
                Err(err) => warn!("Login attempt sweep failed: {err}"),
            }
        }
    });
}
