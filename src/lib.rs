//! # Guardia (Admin Session Gate)
//!
//! `guardia` fronts the admin console of a personal site. It does two things:
//!
//! 1. **Sessions** — mints, verifies, and refreshes stateless signed session
//!    tokens (`v4.public`-style, Ed25519). The whole session lives in the
//!    client's cookie; there is no server-side session table and therefore no
//!    revocation before expiry.
//! 2. **Login rate limiting** — tallies failed logins per client IP in
//!    `PostgreSQL` and blocks an address for a cooldown once its allowance is
//!    spent. A degraded database fails open by default so the console stays
//!    reachable.
//!
//! The content surface of the site (blog, newsletter, contact forms) lives
//! elsewhere and consults `guardia` through the login/session endpoints.

pub mod api;
pub mod cli;

#[cfg(test)]
mod tests {
    use anyhow::{ensure, Context, Result};
    use std::fs;
    use std::path::PathBuf;

    // Normalize SQL to avoid brittle formatting checks in schema tests.
    fn canonicalize_sql(sql: &str) -> String {
        sql.chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_lowercase())
            .collect()
    }

    #[test]
    fn schema_sql_integrity() -> Result<()> {
        // The attempt store assumes this exact table shape.
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_guardia.sql");
        let sql = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read SQL file at {}", path.display()))?;
        let canonical = canonicalize_sql(&sql);

        ensure!(
            canonical.contains("createtableifnotexistslogin_attempts"),
            "login_attempts table is missing in {}",
            path.display()
        );
        ensure!(
            canonical.contains("identifiertextprimarykey"),
            "identifier primary key is missing in {}",
            path.display()
        );
        ensure!(
            canonical.contains("attemptsbigintnotnulldefault0"),
            "attempts default is missing in {}",
            path.display()
        );
        ensure!(
            canonical.contains("blocked_untiltimestamptz"),
            "blocked_until column is missing in {}",
            path.display()
        );
        Ok(())
    }
}
