//! Stateless admin session tokens.
//!
//! Flow Overview:
//! 1) `issue` mints a signed token holding the whole session state.
//! 2) `verify` checks signature, expiry, maximum age, and inactivity.
//! 3) `refresh` re-signs a valid token with a new activity horizon.
//!
//! There is no server-side session table: the holder of the signed token IS
//! the session, and logout simply discards the client's copy. Revocation
//! before expiry is impossible; the limits below bound the exposure.

use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use ed25519_dalek::{SigningKey, VerifyingKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::{error, warn};
use ulid::Ulid;

use super::codec::{self, TokenError};

const DEFAULT_SESSION_TTL: Duration = Duration::hours(24);
const DEFAULT_MAX_SESSION_AGE: Duration = Duration::days(7);
const DEFAULT_MAX_INACTIVITY: Duration = Duration::hours(4);
const KEY_ID_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    adm: bool,
    sid: String,
    iat: String,
    act: String,
    exp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ua: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFooter {
    kid: String,
}

/// Decoded session state carried inside a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub is_admin: bool,
    pub session_id: String,
    pub login_time: OffsetDateTime,
    pub last_activity: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub session: Session,
}

pub struct SessionTokenService {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    key_id: String,
    session_ttl: Duration,
    max_session_age: Duration,
    max_inactivity: Duration,
}

impl std::fmt::Debug for SessionTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokenService")
            .field("signing_key", &"***")
            .field("key_id", &self.key_id)
            .field("session_ttl", &self.session_ttl)
            .field("max_session_age", &self.max_session_age)
            .field("max_inactivity", &self.max_inactivity)
            .finish()
    }
}

impl SessionTokenService {
    /// Build the service from a base64-encoded 32-byte Ed25519 seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is not valid base64 or not 32 bytes.
    pub fn from_secret(secret: &SecretString) -> Result<Self, TokenError> {
        let raw = Base64::decode_vec(secret.expose_secret().trim())
            .map_err(|_| TokenError::Base64)?;
        let seed: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| TokenError::InvalidKeyLength)?;
        let signing_key = SigningKey::from_bytes(&seed);
        let verifying_key = signing_key.verifying_key();
        let key_id = derive_key_id(&verifying_key);
        Ok(Self {
            signing_key,
            verifying_key,
            key_id,
            session_ttl: DEFAULT_SESSION_TTL,
            max_session_age: DEFAULT_MAX_SESSION_AGE,
            max_inactivity: DEFAULT_MAX_INACTIVITY,
        })
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_session_age(mut self, age: Duration) -> Self {
        self.max_session_age = age;
        self
    }

    #[must_use]
    pub fn with_max_inactivity(mut self, inactivity: Duration) -> Self {
        self.max_inactivity = inactivity;
        self
    }

    /// Issue a fresh admin session token.
    ///
    /// # Errors
    ///
    /// Returns an error if timestamp formatting or signing fails.
    pub fn issue(
        &self,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(OffsetDateTime::now_utc(), ip_address, user_agent)
    }

    /// Issue a fresh token as of `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if timestamp formatting or signing fails.
    pub fn issue_at(
        &self,
        now: OffsetDateTime,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<IssuedToken, TokenError> {
        let session = Session {
            is_admin: true,
            session_id: Ulid::new().to_string(),
            login_time: now,
            last_activity: now,
            expires_at: now + self.session_ttl,
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
        };
        let token = self.sign_session(&session)?;
        Ok(IssuedToken { token, session })
    }

    /// Verify a serialized token and return the decoded session.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, its signature does not
    /// verify, it has expired, the session exceeded its maximum age, or the
    /// session has been inactive for too long.
    pub fn verify(
        &self,
        token: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Session, TokenError> {
        self.verify_at(token, OffsetDateTime::now_utc(), ip_address, user_agent)
    }

    /// Verify a serialized token as of `now`. Read-only: callers decide
    /// whether to refresh.
    ///
    /// # Errors
    ///
    /// See [`Self::verify`].
    pub fn verify_at(
        &self,
        token: &str,
        now: OffsetDateTime,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Session, TokenError> {
        let parts = codec::verify_token(&self.verifying_key, token)?;

        let footer: SessionFooter = serde_json::from_slice(&parts.footer)?;
        if footer.kid != self.key_id {
            return Err(TokenError::UnknownKid(footer.kid));
        }

        let claims: SessionClaims = serde_json::from_slice(&parts.payload)?;
        if !claims.adm {
            return Err(TokenError::NotAdmin);
        }

        let session = Session {
            is_admin: claims.adm,
            session_id: claims.sid,
            login_time: codec::parse_timestamp(&claims.iat)?,
            last_activity: codec::parse_timestamp(&claims.act)?,
            expires_at: codec::parse_timestamp(&claims.exp)?,
            ip_address: claims.ip,
            user_agent: claims.ua,
        };

        if session.expires_at <= session.login_time
            || session.last_activity < session.login_time
            || session.last_activity > session.expires_at
        {
            return Err(TokenError::InvalidTimestamps);
        }
        if now >= session.expires_at {
            return Err(TokenError::Expired);
        }
        if now - session.login_time > self.max_session_age {
            return Err(TokenError::SessionTooOld);
        }
        if now - session.last_activity > self.max_inactivity {
            return Err(TokenError::Inactive);
        }

        // IP and user agent are audit context, not a binding: warn and carry on.
        if let (Some(expected), Some(seen)) = (session.ip_address.as_deref(), ip_address) {
            if expected != seen {
                warn!(
                    session_id = %session.session_id,
                    "Session presented from a different IP ({expected} at login, {seen} now)"
                );
            }
        }
        if let (Some(expected), Some(seen)) = (session.user_agent.as_deref(), user_agent) {
            if expected != seen {
                warn!(
                    session_id = %session.session_id,
                    "Session presented with a different user agent"
                );
            }
        }

        Ok(session)
    }

    /// Re-sign a valid token with a fresh activity horizon, preserving its
    /// identity. Returns `None` when the token does not verify; callers must
    /// then force re-authentication.
    #[must_use]
    pub fn refresh(
        &self,
        token: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Option<IssuedToken> {
        self.refresh_at(token, OffsetDateTime::now_utc(), ip_address, user_agent)
    }

    /// Refresh a token as of `now`.
    #[must_use]
    pub fn refresh_at(
        &self,
        token: &str,
        now: OffsetDateTime,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Option<IssuedToken> {
        let current = self.verify_at(token, now, ip_address, user_agent).ok()?;
        let session = Session {
            last_activity: now,
            expires_at: now + self.session_ttl,
            ..current
        };
        match self.sign_session(&session) {
            Ok(token) => Some(IssuedToken { token, session }),
            Err(err) => {
                error!("Failed to re-sign session token: {err}");
                None
            }
        }
    }

    fn sign_session(&self, session: &Session) -> Result<String, TokenError> {
        let claims = SessionClaims {
            adm: session.is_admin,
            sid: session.session_id.clone(),
            iat: codec::format_timestamp(session.login_time)?,
            act: codec::format_timestamp(session.last_activity)?,
            exp: codec::format_timestamp(session.expires_at)?,
            ip: session.ip_address.clone(),
            ua: session.user_agent.clone(),
        };
        let footer = SessionFooter {
            kid: self.key_id.clone(),
        };
        let payload = serde_json::to_vec(&claims)?;
        let footer_bytes = serde_json::to_vec(&footer)?;
        codec::sign_token(&self.signing_key, &payload, &footer_bytes)
    }
}

fn derive_key_id(verifying_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(verifying_key.as_bytes());
    let mut kid = Base64UrlUnpadded::encode_string(&digest);
    kid.truncate(KEY_ID_LEN);
    kid
}
