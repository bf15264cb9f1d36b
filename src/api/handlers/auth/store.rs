//! Persistence for login attempt records.
//!
//! The store is a thin key-value seam: one row per client identifier, mutated
//! only through [`AttemptStore`]. Failure counting is a single atomic
//! round-trip so concurrent logins from the same identifier never
//! under-count.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{info_span, Instrument};

/// Snapshot of one identifier's attempt history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempts: i64,
    pub last_attempt: OffsetDateTime,
    pub blocked_until: Option<OffsetDateTime>,
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Load the record for `identifier`, if any.
    async fn load(&self, identifier: &str) -> Result<Option<AttemptRecord>>;

    /// Atomically count one more failure, resetting the tally first when the
    /// reset window has elapsed since the previous attempt. Returns the
    /// updated record.
    async fn register_failure(
        &self,
        identifier: &str,
        now: OffsetDateTime,
        reset_window: Duration,
    ) -> Result<AttemptRecord>;

    /// Full reset after a successful login: zero attempts, clear any block,
    /// stamp `last_attempt`.
    async fn reset(&self, identifier: &str, now: OffsetDateTime) -> Result<()>;

    /// Zero attempts and clear any block without touching `last_attempt`.
    /// Used when the reset window or a block has run out.
    async fn forgive(&self, identifier: &str) -> Result<()>;

    /// Mark `identifier` as blocked until the given instant.
    async fn block(&self, identifier: &str, until: OffsetDateTime) -> Result<()>;

    /// Delete records whose `last_attempt` is older than `cutoff`. Returns
    /// the number of rows removed.
    async fn sweep(&self, cutoff: OffsetDateTime) -> Result<u64>;
}

/// `PostgreSQL`-backed store; synchronizes limits across service instances.
#[derive(Debug, Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn interval(duration: Duration) -> String {
    format!("{} seconds", duration.whole_seconds())
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> AttemptRecord {
    AttemptRecord {
        attempts: row.get("attempts"),
        last_attempt: row.get("last_attempt"),
        blocked_until: row.get("blocked_until"),
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn load(&self, identifier: &str) -> Result<Option<AttemptRecord>> {
        let query =
            "SELECT attempts, last_attempt, blocked_until FROM login_attempts WHERE identifier = $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load attempt record")?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn register_failure(
        &self,
        identifier: &str,
        now: OffsetDateTime,
        reset_window: Duration,
    ) -> Result<AttemptRecord> {
        // Single upsert so concurrent failures serialize on the row instead
        // of racing a read-modify-write cycle.
        let query = r"
            INSERT INTO login_attempts (identifier, attempts, last_attempt)
            VALUES ($1, 1, $2)
            ON CONFLICT (identifier) DO UPDATE
            SET attempts = CASE
                    WHEN login_attempts.last_attempt <= $2 - $3::interval THEN 1
                    ELSE login_attempts.attempts + 1
                END,
                blocked_until = CASE
                    WHEN login_attempts.last_attempt <= $2 - $3::interval THEN NULL
                    ELSE login_attempts.blocked_until
                END,
                last_attempt = $2
            RETURNING attempts, last_attempt, blocked_until
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
        let row = sqlx::query(query)
            .bind(identifier)
            .bind(now)
            .bind(interval(reset_window))
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to register login failure")?;
        Ok(record_from_row(&row))
    }

    async fn reset(&self, identifier: &str, now: OffsetDateTime) -> Result<()> {
        let query = r"
            INSERT INTO login_attempts (identifier, attempts, last_attempt, blocked_until)
            VALUES ($1, 0, $2, NULL)
            ON CONFLICT (identifier) DO UPDATE
            SET attempts = 0, blocked_until = NULL, last_attempt = $2
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
        sqlx::query(query)
            .bind(identifier)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to reset attempt record")?;
        Ok(())
    }

    async fn forgive(&self, identifier: &str) -> Result<()> {
        let query =
            "UPDATE login_attempts SET attempts = 0, blocked_until = NULL WHERE identifier = $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
        sqlx::query(query)
            .bind(identifier)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to forgive attempt record")?;
        Ok(())
    }

    async fn block(&self, identifier: &str, until: OffsetDateTime) -> Result<()> {
        let query = "UPDATE login_attempts SET blocked_until = $2 WHERE identifier = $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
        sqlx::query(query)
            .bind(identifier)
            .bind(until)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to block identifier")?;
        Ok(())
    }

    async fn sweep(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let query = "DELETE FROM login_attempts WHERE last_attempt < $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "DELETE");
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep attempt records")?;
        Ok(result.rows_affected())
    }
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    records: Mutex<HashMap<String, AttemptRecord>>,
}

impl MemoryAttemptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn load(&self, identifier: &str) -> Result<Option<AttemptRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(identifier).cloned())
    }

    async fn register_failure(
        &self,
        identifier: &str,
        now: OffsetDateTime,
        reset_window: Duration,
    ) -> Result<AttemptRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(identifier.to_string())
            .and_modify(|record| {
                if record.last_attempt <= now - reset_window {
                    record.attempts = 1;
                    record.blocked_until = None;
                } else {
                    record.attempts += 1;
                }
                record.last_attempt = now;
            })
            .or_insert(AttemptRecord {
                attempts: 1,
                last_attempt: now,
                blocked_until: None,
            });
        Ok(record.clone())
    }

    async fn reset(&self, identifier: &str, now: OffsetDateTime) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(
            identifier.to_string(),
            AttemptRecord {
                attempts: 0,
                last_attempt: now,
                blocked_until: None,
            },
        );
        Ok(())
    }

    async fn forgive(&self, identifier: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(identifier) {
            record.attempts = 0;
            record.blocked_until = None;
        }
        Ok(())
    }

    async fn block(&self, identifier: &str, until: OffsetDateTime) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(identifier) {
            record.blocked_until = Some(until);
        }
        Ok(())
    }

    async fn sweep(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.last_attempt >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(unix: i64) -> OffsetDateTime {
        match OffsetDateTime::from_unix_timestamp(unix) {
            Ok(value) => value,
            Err(err) => panic!("bad unix timestamp: {err}"),
        }
    }

    const NOW: i64 = 1_700_000_000;
    const WINDOW: Duration = Duration::hours(1);

    #[tokio::test]
    async fn register_failure_counts_up() -> Result<()> {
        let store = MemoryAttemptStore::new();
        let first = store.register_failure("id", at(NOW), WINDOW).await?;
        assert_eq!(first.attempts, 1);
        let second = store.register_failure("id", at(NOW + 10), WINDOW).await?;
        assert_eq!(second.attempts, 2);
        assert_eq!(second.last_attempt, at(NOW + 10));
        Ok(())
    }

    #[tokio::test]
    async fn register_failure_restarts_after_window() -> Result<()> {
        let store = MemoryAttemptStore::new();
        store.register_failure("id", at(NOW), WINDOW).await?;
        store.register_failure("id", at(NOW + 1), WINDOW).await?;

        let later = at(NOW + 1) + WINDOW + Duration::seconds(1);
        let record = store.register_failure("id", later, WINDOW).await?;
        assert_eq!(record.attempts, 1);
        assert_eq!(record.blocked_until, None);
        Ok(())
    }

    #[tokio::test]
    async fn reset_clears_everything_and_stamps_time() -> Result<()> {
        let store = MemoryAttemptStore::new();
        store.register_failure("id", at(NOW), WINDOW).await?;
        store.block("id", at(NOW + 900)).await?;

        store.reset("id", at(NOW + 60)).await?;
        let record = store.load("id").await?;
        assert_eq!(
            record,
            Some(AttemptRecord {
                attempts: 0,
                last_attempt: at(NOW + 60),
                blocked_until: None,
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn forgive_keeps_last_attempt() -> Result<()> {
        let store = MemoryAttemptStore::new();
        store.register_failure("id", at(NOW), WINDOW).await?;
        store.block("id", at(NOW + 900)).await?;

        store.forgive("id").await?;
        let record = store.load("id").await?;
        assert_eq!(
            record,
            Some(AttemptRecord {
                attempts: 0,
                last_attempt: at(NOW),
                blocked_until: None,
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_records() -> Result<()> {
        let store = MemoryAttemptStore::new();
        store.register_failure("old", at(NOW), WINDOW).await?;
        store
            .register_failure("fresh", at(NOW + 7200), WINDOW)
            .await?;

        let removed = store.sweep(at(NOW + 3600)).await?;
        assert_eq!(removed, 1);
        assert!(store.load("old").await?.is_none());
        assert!(store.load("fresh").await?.is_some());
        Ok(())
    }
}
