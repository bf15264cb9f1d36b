//! Login attempt limiting with a maximum-attempts-then-cooldown policy.
//!
//! Flow Overview:
//! 1) `check` gates a login before credentials are examined.
//! 2) `record` tallies the outcome after credentials are examined.
//! 3) Once the tally runs out, `check` blocks the identifier for a cooldown.
//!
//! Callers must pair the two around every credential validation; skipping
//! either breaks the tally. Per identifier the record moves
//! CLEAN -> ACCUMULATING -> BLOCKED and back to CLEAN on success, block
//! expiry, or reset-window elapse.

use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, warn};

use super::store::AttemptStore;

const DEFAULT_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_BLOCK_DURATION: Duration = Duration::minutes(15);
const DEFAULT_RESET_WINDOW: Duration = Duration::hours(1);
const DEFAULT_RECORD_TTL: Duration = Duration::hours(24);

/// Store key for login attempts from one client address.
#[must_use]
pub fn login_identifier(ip: &str) -> String {
    format!("admin_login_{ip}")
}

/// Verdict of a single `check` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub allowed: bool,
    pub remaining_attempts: i64,
    pub blocked_until: Option<OffsetDateTime>,
}

pub struct LoginAttemptLimiter {
    store: Arc<dyn AttemptStore>,
    max_attempts: i64,
    block_duration: Duration,
    reset_window: Duration,
    record_ttl: Duration,
    fail_open: bool,
}

impl LoginAttemptLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            block_duration: DEFAULT_BLOCK_DURATION,
            reset_window: DEFAULT_RESET_WINDOW,
            record_ttl: DEFAULT_RECORD_TTL,
            fail_open: true,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_block_duration(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }

    #[must_use]
    pub fn with_reset_window(mut self, reset_window: Duration) -> Self {
        self.reset_window = reset_window;
        self
    }

    #[must_use]
    pub fn with_record_ttl(mut self, record_ttl: Duration) -> Self {
        self.record_ttl = record_ttl;
        self
    }

    #[must_use]
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Decide whether a login attempt from `identifier` may proceed.
    pub async fn check(&self, identifier: &str) -> CheckOutcome {
        self.check_at(identifier, OffsetDateTime::now_utc()).await
    }

    /// `check` as of `now`.
    pub async fn check_at(&self, identifier: &str, now: OffsetDateTime) -> CheckOutcome {
        let record = match self.store.load(identifier).await {
            Ok(record) => record,
            Err(err) => return self.degraded(identifier, &err),
        };
        let Some(record) = record else {
            return CheckOutcome {
                allowed: true,
                remaining_attempts: self.max_attempts,
                blocked_until: None,
            };
        };

        if let Some(until) = record.blocked_until {
            if now < until {
                return CheckOutcome {
                    allowed: false,
                    remaining_attempts: 0,
                    blocked_until: Some(until),
                };
            }
        }

        // An expired block or an elapsed reset window forgives the tally.
        // Persisted so a later failure starts from a clean slate.
        let block_expired = record.blocked_until.is_some();
        let window_elapsed = now - record.last_attempt >= self.reset_window;
        let attempts = if block_expired || window_elapsed {
            if let Err(err) = self.store.forgive(identifier).await {
                error!("Failed to forgive attempt record for {identifier}: {err}");
            }
            0
        } else {
            record.attempts
        };

        let remaining = self.max_attempts - attempts;
        if remaining <= 0 {
            let until = now + self.block_duration;
            if let Err(err) = self.store.block(identifier, until).await {
                // The tally already proves abuse; deny even if the block
                // could not be persisted.
                error!("Failed to persist block for {identifier}: {err}");
            }
            return CheckOutcome {
                allowed: false,
                remaining_attempts: 0,
                blocked_until: Some(until),
            };
        }

        CheckOutcome {
            allowed: true,
            remaining_attempts: remaining,
            blocked_until: None,
        }
    }

    /// Tally the outcome of a login attempt. Never blocks by itself; the
    /// next `check` transitions the record once the tally runs out.
    pub async fn record(&self, identifier: &str, success: bool) {
        self.record_at(identifier, success, OffsetDateTime::now_utc())
            .await;
    }

    /// `record` as of `now`.
    pub async fn record_at(&self, identifier: &str, success: bool, now: OffsetDateTime) {
        if success {
            if let Err(err) = self.store.reset(identifier, now).await {
                error!("Failed to reset attempt record for {identifier}: {err}");
            }
            return;
        }

        match self
            .store
            .register_failure(identifier, now, self.reset_window)
            .await
        {
            Ok(record) => {
                debug!(
                    identifier,
                    attempts = record.attempts,
                    "Recorded failed login attempt"
                );
            }
            Err(err) => error!("Failed to record login attempt for {identifier}: {err}"),
        }
    }

    /// Drop records idle longer than the record TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the store delete fails.
    pub async fn sweep_stale(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        self.store.sweep(now - self.record_ttl).await
    }

    fn degraded(&self, identifier: &str, err: &anyhow::Error) -> CheckOutcome {
        if self.fail_open {
            warn!("Attempt store unreachable, failing open for {identifier}: {err}");
            CheckOutcome {
                allowed: true,
                remaining_attempts: self.max_attempts,
                blocked_until: None,
            }
        } else {
            error!("Attempt store unreachable, failing closed for {identifier}: {err}");
            CheckOutcome {
                allowed: false,
                remaining_attempts: 0,
                blocked_until: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::{AttemptRecord, MemoryAttemptStore};
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    fn at(unix: i64) -> OffsetDateTime {
        match OffsetDateTime::from_unix_timestamp(unix) {
            Ok(value) => value,
            Err(err) => panic!("bad unix timestamp: {err}"),
        }
    }

    const NOW: i64 = 1_700_000_000;

    fn limiter() -> LoginAttemptLimiter {
        LoginAttemptLimiter::new(Arc::new(MemoryAttemptStore::new()))
    }

    /// Store double whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl AttemptStore for BrokenStore {
        async fn load(&self, _identifier: &str) -> Result<Option<AttemptRecord>> {
            Err(anyhow!("store down"))
        }

        async fn register_failure(
            &self,
            _identifier: &str,
            _now: OffsetDateTime,
            _reset_window: Duration,
        ) -> Result<AttemptRecord> {
            Err(anyhow!("store down"))
        }

        async fn reset(&self, _identifier: &str, _now: OffsetDateTime) -> Result<()> {
            Err(anyhow!("store down"))
        }

        async fn forgive(&self, _identifier: &str) -> Result<()> {
            Err(anyhow!("store down"))
        }

        async fn block(&self, _identifier: &str, _until: OffsetDateTime) -> Result<()> {
            Err(anyhow!("store down"))
        }

        async fn sweep(&self, _cutoff: OffsetDateTime) -> Result<u64> {
            Err(anyhow!("store down"))
        }
    }

    #[test]
    fn login_identifier_prefixes_ip() {
        assert_eq!(login_identifier("1.2.3.4"), "admin_login_1.2.3.4");
    }

    #[tokio::test]
    async fn fresh_identifier_gets_full_allowance() {
        let limiter = limiter();
        let outcome = limiter.check_at("admin_login_1.2.3.4", at(NOW)).await;
        assert_eq!(
            outcome,
            CheckOutcome {
                allowed: true,
                remaining_attempts: 5,
                blocked_until: None,
            }
        );
    }

    #[tokio::test]
    async fn failures_count_down_the_allowance() {
        let limiter = limiter();
        let id = "admin_login_1.2.3.4";

        limiter.check_at(id, at(NOW)).await;
        limiter.record_at(id, false, at(NOW)).await;

        let outcome = limiter.check_at(id, at(NOW + 1)).await;
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining_attempts, 4);
    }

    #[tokio::test]
    async fn five_failures_block_for_the_cooldown() {
        let limiter = limiter();
        let id = "admin_login_1.2.3.4";

        for i in 0..5 {
            let outcome = limiter.check_at(id, at(NOW + i)).await;
            assert!(outcome.allowed, "attempt {i} should still be allowed");
            limiter.record_at(id, false, at(NOW + i)).await;
        }

        let outcome = limiter.check_at(id, at(NOW + 5)).await;
        assert!(!outcome.allowed);
        assert_eq!(outcome.remaining_attempts, 0);
        assert_eq!(outcome.blocked_until, Some(at(NOW + 5) + Duration::minutes(15)));

        // Still blocked on a later check, with the original horizon.
        let outcome = limiter.check_at(id, at(NOW + 60)).await;
        assert!(!outcome.allowed);
        assert_eq!(outcome.blocked_until, Some(at(NOW + 5) + Duration::minutes(15)));
    }

    #[tokio::test]
    async fn block_expiry_restores_the_allowance() {
        let limiter = limiter();
        let id = "admin_login_1.2.3.4";

        for i in 0..5 {
            limiter.check_at(id, at(NOW + i)).await;
            limiter.record_at(id, false, at(NOW + i)).await;
        }
        let blocked = limiter.check_at(id, at(NOW + 5)).await;
        assert!(!blocked.allowed);

        // Sixteen minutes later the block has run out.
        let outcome = limiter.check_at(id, at(NOW + 5 + 16 * 60)).await;
        assert_eq!(
            outcome,
            CheckOutcome {
                allowed: true,
                remaining_attempts: 5,
                blocked_until: None,
            }
        );

        // And the next failure starts a fresh tally, not a sixth strike.
        limiter.record_at(id, false, at(NOW + 5 + 16 * 60)).await;
        let outcome = limiter.check_at(id, at(NOW + 6 + 16 * 60)).await;
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining_attempts, 4);
    }

    #[tokio::test]
    async fn success_resets_a_partial_tally() {
        let limiter = limiter();
        let id = "admin_login_1.2.3.4";

        for i in 0..3 {
            limiter.check_at(id, at(NOW + i)).await;
            limiter.record_at(id, false, at(NOW + i)).await;
        }
        limiter.check_at(id, at(NOW + 3)).await;
        limiter.record_at(id, true, at(NOW + 3)).await;

        let outcome = limiter.check_at(id, at(NOW + 4)).await;
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining_attempts, 5);
    }

    #[tokio::test]
    async fn reset_window_forgives_an_accumulating_tally() {
        let limiter = limiter();
        let id = "admin_login_1.2.3.4";

        for i in 0..3 {
            limiter.check_at(id, at(NOW + i)).await;
            limiter.record_at(id, false, at(NOW + i)).await;
        }

        let later = at(NOW + 2) + Duration::hours(1);
        let outcome = limiter.check_at(id, later).await;
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining_attempts, 5);
    }

    #[tokio::test]
    async fn store_failure_fails_open_by_default() {
        let limiter = LoginAttemptLimiter::new(Arc::new(BrokenStore));
        let outcome = limiter.check_at("id", at(NOW)).await;
        assert_eq!(
            outcome,
            CheckOutcome {
                allowed: true,
                remaining_attempts: 5,
                blocked_until: None,
            }
        );

        // Recording against a broken store logs and carries on.
        limiter.record_at("id", false, at(NOW)).await;
        limiter.record_at("id", true, at(NOW)).await;
    }

    #[tokio::test]
    async fn store_failure_can_fail_closed() {
        let limiter = LoginAttemptLimiter::new(Arc::new(BrokenStore)).with_fail_open(false);
        let outcome = limiter.check_at("id", at(NOW)).await;
        assert!(!outcome.allowed);
        assert_eq!(outcome.remaining_attempts, 0);
        assert_eq!(outcome.blocked_until, None);
    }

    #[tokio::test]
    async fn sweep_uses_the_record_ttl() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let limiter = LoginAttemptLimiter::new(store.clone());

        store
            .register_failure("stale", at(NOW), Duration::hours(1))
            .await?;
        store
            .register_failure("active", at(NOW) + Duration::hours(23), Duration::hours(1))
            .await?;

        let removed = limiter.sweep_stale(at(NOW) + Duration::hours(25)).await?;
        assert_eq!(removed, 1);
        assert!(store.load("stale").await?.is_none());
        assert!(store.load("active").await?.is_some());
        Ok(())
    }
}
