//! Auth configuration and shared state.

use anyhow::{Context, Result};
use argon2::password_hash::PasswordHash;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use time::Duration;
use tracing::error;

use super::rate_limit::LoginAttemptLimiter;
use super::store::AttemptStore;
use super::token::SessionTokenService;
use super::utils;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_MAX_SESSION_AGE_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_MAX_INACTIVITY_SECONDS: i64 = 4 * 60 * 60;
const DEFAULT_REFRESH_AFTER_SECONDS: i64 = 15 * 60;
const DEFAULT_EXPIRING_SOON_SECONDS: i64 = 60 * 60;
const DEFAULT_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_BLOCK_SECONDS: i64 = 15 * 60;
const DEFAULT_RESET_WINDOW_SECONDS: i64 = 60 * 60;
const DEFAULT_ATTEMPT_RECORD_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_FAILED_LOGIN_DELAY_MS: u64 = 2000;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
    max_session_age_seconds: i64,
    max_inactivity_seconds: i64,
    refresh_after_seconds: i64,
    expiring_soon_seconds: i64,
    max_attempts: i64,
    block_seconds: i64,
    reset_window_seconds: i64,
    attempt_record_ttl_seconds: i64,
    failed_login_delay_ms: u64,
    sweep_interval_seconds: u64,
    rate_limit_fail_open: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            max_session_age_seconds: DEFAULT_MAX_SESSION_AGE_SECONDS,
            max_inactivity_seconds: DEFAULT_MAX_INACTIVITY_SECONDS,
            refresh_after_seconds: DEFAULT_REFRESH_AFTER_SECONDS,
            expiring_soon_seconds: DEFAULT_EXPIRING_SOON_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            block_seconds: DEFAULT_BLOCK_SECONDS,
            reset_window_seconds: DEFAULT_RESET_WINDOW_SECONDS,
            attempt_record_ttl_seconds: DEFAULT_ATTEMPT_RECORD_TTL_SECONDS,
            failed_login_delay_ms: DEFAULT_FAILED_LOGIN_DELAY_MS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            rate_limit_fail_open: true,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_session_age_seconds(mut self, seconds: i64) -> Self {
        self.max_session_age_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_inactivity_seconds(mut self, seconds: i64) -> Self {
        self.max_inactivity_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_after_seconds(mut self, seconds: i64) -> Self {
        self.refresh_after_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_failed_login_delay_ms(mut self, millis: u64) -> Self {
        self.failed_login_delay_ms = millis;
        self
    }

    #[must_use]
    pub fn with_rate_limit_fail_open(mut self, fail_open: bool) -> Self {
        self.rate_limit_fail_open = fail_open;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(super) fn max_session_age_seconds(&self) -> i64 {
        self.max_session_age_seconds
    }

    pub(super) fn max_inactivity_seconds(&self) -> i64 {
        self.max_inactivity_seconds
    }

    pub(super) fn refresh_after_seconds(&self) -> i64 {
        self.refresh_after_seconds
    }

    pub(super) fn expiring_soon_seconds(&self) -> i64 {
        self.expiring_soon_seconds
    }

    pub(super) fn failed_login_delay_ms(&self) -> u64 {
        self.failed_login_delay_ms
    }

    #[must_use]
    pub fn sweep_interval_seconds(&self) -> u64 {
        self.sweep_interval_seconds
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    tokens: SessionTokenService,
    limiter: LoginAttemptLimiter,
    admin_password_hash: SecretString,
}

impl AuthState {
    /// Wire the token service and attempt limiter from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing secret is unusable or the admin
    /// password hash is not a valid PHC string. Both are startup-time hard
    /// failures; there are no insecure fallbacks.
    pub fn new(
        config: AuthConfig,
        session_secret: &SecretString,
        admin_password_hash: SecretString,
        store: Arc<dyn AttemptStore>,
    ) -> Result<Self> {
        PasswordHash::new(admin_password_hash.expose_secret())
            .map_err(|err| anyhow::anyhow!("{err}"))
            .context("Admin password hash is not a valid PHC string")?;

        let tokens = SessionTokenService::from_secret(session_secret)
            .context("Session signing secret must be base64-encoded 32 bytes")?
            .with_session_ttl(Duration::seconds(config.session_ttl_seconds()))
            .with_max_session_age(Duration::seconds(config.max_session_age_seconds()))
            .with_max_inactivity(Duration::seconds(config.max_inactivity_seconds()));

        let limiter = LoginAttemptLimiter::new(store)
            .with_max_attempts(config.max_attempts)
            .with_block_duration(Duration::seconds(config.block_seconds))
            .with_reset_window(Duration::seconds(config.reset_window_seconds))
            .with_record_ttl(Duration::seconds(config.attempt_record_ttl_seconds))
            .with_fail_open(config.rate_limit_fail_open);

        Ok(Self {
            config,
            tokens,
            limiter,
            admin_password_hash,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &SessionTokenService {
        &self.tokens
    }

    #[must_use]
    pub fn limiter(&self) -> &LoginAttemptLimiter {
        &self.limiter
    }

    /// Check a password candidate against the configured admin hash.
    pub(super) fn verify_password(&self, candidate: &str) -> bool {
        match utils::verify_password(self.admin_password_hash.expose_secret(), candidate) {
            Ok(matches) => matches,
            Err(err) => {
                error!("Password verification failed: {err}");
                false
            }
        }
    }
}
