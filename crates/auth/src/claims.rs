use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Permission;

/// Which of the two token kinds a token is.
///
/// A token is only ever valid as the kind it was issued as.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl core::fmt::Display for TokenType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TokenType {
    type Err = TokenValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenType::Access),
            "refresh" => Ok(TokenType::Refresh),
            _ => Err(TokenValidationError::Malformed(format!("unknown token type '{s}'"))),
        }
    }
}

/// JWT claims carried by every access and refresh token.
///
/// Timestamps are whole unix seconds on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user id).
    pub sub: String,

    pub email: String,

    /// Permission claims, in issuance order.
    #[serde(default)]
    pub permissions: Vec<Permission>,

    pub token_type: TokenType,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,

    pub iss: String,

    pub aud: String,

    /// Unique token id; keeps two tokens minted in the same second distinct.
    pub jti: String,
}

/// Why a token was rejected.
///
/// This is the payload of a negative validation result, not an error that
/// escapes `validate_token`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("no token supplied")]
    Missing,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("token signed with an unexpected algorithm")]
    AlgorithmMismatch,

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("wrong token type: expected {expected}, got {actual}")]
    WrongType { expected: TokenType, actual: TokenType },

    #[error("token issuer mismatch")]
    IssuerMismatch,

    #[error("token audience mismatch")]
    AudienceMismatch,
}

/// Deterministically validate decoded claims against `now`.
///
/// Signature, issuer and audience are checked while decoding; this covers the
/// time window and the token kind. `leeway` widens both ends of the window.
pub fn validate_claims(
    claims: &TokenClaims,
    expected: TokenType,
    now: DateTime<Utc>,
    leeway: Duration,
) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now + leeway < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp + leeway {
        return Err(TokenValidationError::Expired);
    }
    if claims.token_type != expected {
        return Err(TokenValidationError::WrongType {
            expected,
            actual: claims.token_type,
        });
    }
    Ok(())
}
