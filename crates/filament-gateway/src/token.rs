//! Signed login tokens.
//!
//! HS256 JWTs with three claims: `acc` (account), `app`, `exp`. The
//! gateway verifies them at accept time; issuing belongs to the account
//! system, with [`generate`] kept for SDKs and tests.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared development secret. Production deployments configure their own.
pub const DEFAULT_SECRET: &str = "fil-9qXpLr4yVnD2wS8tKj5uGz0e";

/// Token errors.
#[derive(Error, Debug)]
pub enum TokenError {
    /// Malformed, tampered or expired token.
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// The claims a login token carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Account id.
    #[serde(rename = "acc")]
    pub account: String,
    /// App the account belongs to.
    pub app: String,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

/// Verify `raw` against `secret` and return its claims. Expired tokens
/// are rejected.
pub fn parse(secret: &str, raw: &str) -> Result<Token, TokenError> {
    let data = jsonwebtoken::decode::<Token>(
        raw,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;

    Ok(data.claims)
}

/// Sign `token` with `secret`.
pub fn generate(secret: &str, token: &Token) -> Result<String, TokenError> {
    let raw = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(Algorithm::HS256),
        token,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(raw)
}
