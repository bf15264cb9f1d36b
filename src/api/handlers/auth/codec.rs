//! `v4.public` token primitives shared by the session token service.
//!
//! A token is `v4.public.<b64url(claims || signature)>.<b64url(footer)>`.
//! The Ed25519 signature covers the pre-authentication encoding (PAE) of the
//! header, the claims JSON, and the footer JSON.

use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const HEADER: &str = "v4.public.";
const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("missing footer")]
    MissingFooter,
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("session exceeded maximum age")]
    SessionTooOld,
    #[error("session inactive for too long")]
    Inactive,
    #[error("not an admin session")]
    NotAdmin,
    #[error("invalid session timestamps")]
    InvalidTimestamps,
    #[error("invalid length")]
    InvalidLength,
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("time parse error")]
    TimeParse,
    #[error("time format error")]
    TimeFormat,
}

/// Raw parts of a structurally valid, signature-checked token.
pub struct TokenParts {
    pub payload: Vec<u8>,
    pub footer: Vec<u8>,
}

/// Sign `payload` and `footer` and assemble the serialized token.
///
/// # Errors
///
/// Returns an error if PAE fails (payload lengths beyond `u64`).
pub fn sign_token(
    signing_key: &SigningKey,
    payload: &[u8],
    footer: &[u8],
) -> Result<String, TokenError> {
    let pre_auth = pae(&[HEADER.as_bytes(), payload, footer, b""])?;
    let signature = signing_key.sign(&pre_auth);
    Ok(build_token(payload, footer, &signature.to_bytes()))
}

/// Build a `v4.public` token from payload, footer, and Ed25519 signature.
#[must_use]
pub fn build_token(payload: &[u8], footer: &[u8], signature: &[u8; SIGNATURE_LEN]) -> String {
    let mut message = Vec::with_capacity(payload.len() + signature.len());
    message.extend_from_slice(payload);
    message.extend_from_slice(signature);
    let body_b64 = Base64UrlUnpadded::encode_string(&message);
    if footer.is_empty() {
        format!("{HEADER}{body_b64}")
    } else {
        let footer_b64 = Base64UrlUnpadded::encode_string(footer);
        format!("{HEADER}{body_b64}.{footer_b64}")
    }
}

/// Split a serialized token, check its signature, and return the raw parts.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64,
/// - the footer is missing,
/// - the signature does not verify against `verifying_key`.
pub fn verify_token(verifying_key: &VerifyingKey, token: &str) -> Result<TokenParts, TokenError> {
    let rest = token.strip_prefix(HEADER).ok_or(TokenError::TokenFormat)?;
    let mut parts = rest.split('.');
    let body_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let footer_b64 = parts.next().ok_or(TokenError::MissingFooter)?;
    if parts.next().is_some() {
        return Err(TokenError::TokenFormat);
    }

    let message = Base64UrlUnpadded::decode_vec(body_b64).map_err(|_| TokenError::Base64)?;
    if message.len() <= SIGNATURE_LEN {
        return Err(TokenError::TokenFormat);
    }
    let (payload, signature_bytes) = message.split_at(message.len() - SIGNATURE_LEN);
    let footer = Base64UrlUnpadded::decode_vec(footer_b64).map_err(|_| TokenError::Base64)?;
    if footer.is_empty() {
        return Err(TokenError::MissingFooter);
    }

    let pre_auth = pae(&[HEADER.as_bytes(), payload, footer.as_slice(), b""])?;
    let signature =
        Signature::from_slice(signature_bytes).map_err(|_| TokenError::InvalidSignature)?;
    verifying_key
        .verify_strict(&pre_auth, &signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    Ok(TokenParts {
        payload: payload.to_vec(),
        footer,
    })
}

/// Format a timestamp as RFC 3339 with nanoseconds stripped.
///
/// # Errors
///
/// Returns an error if formatting fails.
pub fn format_timestamp(value: OffsetDateTime) -> Result<String, TokenError> {
    value
        .replace_nanosecond(0)
        .map_err(|_| TokenError::TimeFormat)?
        .format(&Rfc3339)
        .map_err(|_| TokenError::TimeFormat)
}

/// Parse an RFC 3339 timestamp.
///
/// # Errors
///
/// Returns an error if parsing fails.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, TokenError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|_| TokenError::TimeParse)
}

fn pae(pieces: &[&[u8]]) -> Result<Vec<u8>, TokenError> {
    let count = u64::try_from(pieces.len()).map_err(|_| TokenError::InvalidLength)?;
    let mut out = Vec::new();
    out.extend_from_slice(&le64(count));
    for piece in pieces {
        let len = u64::try_from(piece.len()).map_err(|_| TokenError::InvalidLength)?;
        out.extend_from_slice(&le64(len));
        out.extend_from_slice(piece);
    }
    Ok(out)
}

fn le64(mut value: u64) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (i, byte) in out.iter_mut().enumerate() {
        if i == 7 {
            value &= 0x7f;
        }
        *byte = (value & 0xff) as u8;
        value >>= 8;
    }
    out
}
