//! Token issuance, validation and refresh rotation.
//!
//! Per-token lifecycle: issued, valid while `now < exp`, then expired. Expiry
//! is evaluated at validation time against the caller's clock; there is no
//! background sweep and no revocation list.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use uuid::Uuid;

use netra_core::CoreError;

use crate::claims::{TokenClaims, TokenType, TokenValidationError, validate_claims};
use crate::config::TokenConfig;
use crate::Permission;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token configuration: {0}")]
    Config(#[from] CoreError),

    #[error("invalid {token_type} token ttl of {requested_secs}s (allowed 1..={max_secs}s)")]
    InvalidTtl {
        token_type: TokenType,
        requested_secs: i64,
        max_secs: i64,
    },

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("invalid refresh token: {0}")]
    InvalidRefreshToken(TokenValidationError),
}

/// A freshly signed token together with the claims it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    token: String,
    claims: TokenClaims,
}

impl IssuedToken {
    /// The compact, signed wire form.
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.exp
    }

    pub fn into_string(self) -> String {
        self.token
    }
}

/// Claims of a token that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    claims: TokenClaims,
}

impl ValidatedToken {
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn email(&self) -> &str {
        &self.claims.email
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.claims.permissions
    }

    pub fn token_type(&self) -> TokenType {
        self.claims.token_type
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.exp
    }

    pub fn into_claims(self) -> TokenClaims {
        self.claims
    }
}

/// Outcome of [`TokenLifecycleManager::validate_token`].
///
/// A failed validation carries the reason and nothing else; the payload
/// accessors all return `None` for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidationResult {
    Valid(ValidatedToken),
    Invalid(TokenValidationError),
}

impl TokenValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenValidationResult::Valid(_))
    }

    pub fn validated(&self) -> Option<&ValidatedToken> {
        match self {
            TokenValidationResult::Valid(v) => Some(v),
            TokenValidationResult::Invalid(_) => None,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        self.validated().map(ValidatedToken::subject)
    }

    pub fn email(&self) -> Option<&str> {
        self.validated().map(ValidatedToken::email)
    }

    pub fn permissions(&self) -> Option<&[Permission]> {
        self.validated().map(ValidatedToken::permissions)
    }

    pub fn token_type(&self) -> Option<TokenType> {
        self.validated().map(ValidatedToken::token_type)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.validated().map(ValidatedToken::expires_at)
    }

    /// Why validation failed, if it did.
    pub fn failure(&self) -> Option<&TokenValidationError> {
        match self {
            TokenValidationResult::Valid(_) => None,
            TokenValidationResult::Invalid(reason) => Some(reason),
        }
    }

    pub fn into_result(self) -> Result<ValidatedToken, TokenValidationError> {
        match self {
            TokenValidationResult::Valid(v) => Ok(v),
            TokenValidationResult::Invalid(reason) => Err(reason),
        }
    }
}

/// The rotated pair returned by a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshResult {
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

/// Issues, validates and rotates access/refresh tokens.
///
/// Holds only immutable key material and settings, so one instance can be
/// shared across threads (`Arc<TokenLifecycleManager>`) without locking.
pub struct TokenLifecycleManager {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenLifecycleManager {
    pub fn new(config: TokenConfig) -> Result<Self, TokenError> {
        config.validate()?;

        let mut validation = Validation::new(config.algorithm);
        // Time checks run in `validate_claims` against the caller's clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            config,
        })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue a short-lived access token. `ttl: None` uses the configured default.
    pub fn issue_access_token(
        &self,
        user_id: &str,
        email: &str,
        permissions: &[Permission],
        ttl: Option<Duration>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenType::Access, user_id, email, permissions, ttl, Utc::now())
    }

    pub fn issue_access_token_at(
        &self,
        user_id: &str,
        email: &str,
        permissions: &[Permission],
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenType::Access, user_id, email, permissions, ttl, now)
    }

    /// Issue a long-lived refresh token. `ttl: None` uses the configured default.
    pub fn issue_refresh_token(
        &self,
        user_id: &str,
        email: &str,
        permissions: &[Permission],
        ttl: Option<Duration>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenType::Refresh, user_id, email, permissions, ttl, Utc::now())
    }

    pub fn issue_refresh_token_at(
        &self,
        user_id: &str,
        email: &str,
        permissions: &[Permission],
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenType::Refresh, user_id, email, permissions, ttl, now)
    }

    /// Validate `token` as a token of kind `expected`.
    ///
    /// Never fails: every rejection is a [`TokenValidationResult::Invalid`].
    pub fn validate_token(&self, token: &str, expected: TokenType) -> TokenValidationResult {
        self.validate_token_at(token, expected, Utc::now())
    }

    pub fn validate_token_at(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> TokenValidationResult {
        match self.check(token, expected, now) {
            Ok(claims) => {
                tracing::debug!(sub = %claims.sub, token_type = %claims.token_type, "token validated");
                TokenValidationResult::Valid(ValidatedToken { claims })
            }
            Err(reason) => {
                tracing::info!(expected = %expected, reason = %reason, "token rejected");
                TokenValidationResult::Invalid(reason)
            }
        }
    }

    /// Exchange a refresh token for a brand-new access + refresh pair.
    ///
    /// The presented refresh token is not consumed: it stays valid until its
    /// own expiry.
    pub fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshResult, TokenError> {
        self.refresh_access_token_at(refresh_token, Utc::now())
    }

    pub fn refresh_access_token_at(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshResult, TokenError> {
        let validated = self
            .validate_token_at(refresh_token, TokenType::Refresh, now)
            .into_result()
            .map_err(TokenError::InvalidRefreshToken)?;
        let claims = validated.claims();

        let access_token = self.issue_at(
            TokenType::Access,
            &claims.sub,
            &claims.email,
            &claims.permissions,
            None,
            now,
        )?;
        let rotated = self.issue_at(
            TokenType::Refresh,
            &claims.sub,
            &claims.email,
            &claims.permissions,
            None,
            now,
        )?;

        tracing::info!(sub = %claims.sub, "refresh token rotated");
        Ok(RefreshResult {
            access_token,
            refresh_token: rotated,
        })
    }

    fn issue_at(
        &self,
        token_type: TokenType,
        user_id: &str,
        email: &str,
        permissions: &[Permission],
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = self.resolve_ttl(token_type, ttl)?;
        let iat = now.trunc_subsecs(0);

        let claims = TokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            permissions: permissions.to_vec(),
            token_type,
            iat,
            exp: iat + Duration::seconds(ttl.num_seconds()),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            jti: Uuid::now_v7().to_string(),
        };

        let token = jsonwebtoken::encode(
            &Header::new(self.config.algorithm),
            &claims,
            &self.encoding_key,
        )
        .map_err(TokenError::Signing)?;

        tracing::debug!(sub = %claims.sub, token_type = %token_type, exp = %claims.exp, "token issued");
        Ok(IssuedToken { token, claims })
    }

    fn resolve_ttl(&self, token_type: TokenType, ttl: Option<Duration>) -> Result<Duration, TokenError> {
        let (default, max) = match token_type {
            TokenType::Access => (self.config.access_ttl(), self.config.max_access_ttl()),
            TokenType::Refresh => (self.config.refresh_ttl(), self.config.max_refresh_ttl()),
        };
        let ttl = ttl.unwrap_or(default);
        if ttl < Duration::seconds(1) || ttl > max {
            return Err(TokenError::InvalidTtl {
                token_type,
                requested_secs: ttl.num_seconds(),
                max_secs: max.num_seconds(),
            });
        }
        Ok(ttl)
    }

    fn check(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenValidationError> {
        if token.trim().is_empty() {
            return Err(TokenValidationError::Missing);
        }
        if token.split('.').count() != 3 {
            return Err(TokenValidationError::Malformed(
                "expected three dot-separated segments".to_string(),
            ));
        }

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(classify)?;
        validate_claims(&data.claims, expected, now, self.config.leeway())?;
        Ok(data.claims)
    }
}

impl core::fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenValidationError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenValidationError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => TokenValidationError::AlgorithmMismatch,
        ErrorKind::ExpiredSignature => TokenValidationError::Expired,
        ErrorKind::ImmatureSignature => TokenValidationError::NotYetValid,
        ErrorKind::InvalidIssuer => TokenValidationError::IssuerMismatch,
        ErrorKind::InvalidAudience => TokenValidationError::AudienceMismatch,
        _ => TokenValidationError::Malformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn manager() -> TokenLifecycleManager {
        TokenLifecycleManager::new(TokenConfig::new("test-secret")).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn perms() -> Vec<Permission> {
        vec![Permission::new("threads:read"), Permission::new("agents:run")]
    }

    #[test]
    fn access_token_round_trip() {
        let m = manager();
        let issued = m
            .issue_access_token_at("u1", "u1@example.com", &perms(), None, t0())
            .unwrap();

        let result = m.validate_token_at(issued.as_str(), TokenType::Access, t0());
        assert!(result.is_valid());
        assert_eq!(result.subject(), Some("u1"));
        assert_eq!(result.email(), Some("u1@example.com"));
        assert_eq!(result.permissions(), Some(perms().as_slice()));
        assert_eq!(result.token_type(), Some(TokenType::Access));
        assert_eq!(result.expires_at(), Some(t0() + Duration::minutes(15)));

        let claims = issued.claims();
        assert_eq!(claims.iss, "netra-auth-service");
        assert_eq!(claims.aud, "netra-platform");
    }

    #[test]
    fn refresh_token_uses_longer_default_ttl() {
        let m = manager();
        let issued = m
            .issue_refresh_token_at("u1", "u1@example.com", &[], None, t0())
            .unwrap();
        assert_eq!(issued.expires_at(), t0() + Duration::days(7));
    }

    #[test]
    fn access_token_rejected_as_refresh_and_vice_versa() {
        let m = manager();
        let access = m.issue_access_token_at("u1", "e", &[], None, t0()).unwrap();
        let refresh = m.issue_refresh_token_at("u1", "e", &[], None, t0()).unwrap();

        let r = m.validate_token_at(access.as_str(), TokenType::Refresh, t0());
        assert!(!r.is_valid());
        assert!(matches!(r.failure(), Some(TokenValidationError::WrongType { .. })));

        let r = m.validate_token_at(refresh.as_str(), TokenType::Access, t0());
        assert!(!r.is_valid());
        assert_eq!(r.subject(), None);
    }

    #[test]
    fn token_expires_after_ttl() {
        let m = manager();
        let ttl = Duration::seconds(90);
        let issued = m.issue_access_token_at("u1", "e", &[], Some(ttl), t0()).unwrap();

        assert!(m.validate_token_at(issued.as_str(), TokenType::Access, t0()).is_valid());
        let later = m.validate_token_at(issued.as_str(), TokenType::Access, t0() + ttl);
        assert_eq!(later.failure(), Some(&TokenValidationError::Expired));
        assert_eq!(later.expires_at(), None);
    }

    #[test]
    fn malformed_input_is_invalid_not_an_error() {
        let m = manager();
        for input in ["", "   ", "not.a.jwt.token.at.all", "only.two", "a.b.c", "only.two.segments"] {
            let result = m.validate_token(input, TokenType::Access);
            assert!(!result.is_valid(), "{input:?} should be invalid");
            assert_eq!(result.subject(), None);
        }
        assert_eq!(
            m.validate_token("", TokenType::Access).failure(),
            Some(&TokenValidationError::Missing)
        );
    }

    #[test]
    fn foreign_secret_fails_signature_check() {
        let ours = manager();
        let theirs = TokenLifecycleManager::new(TokenConfig::new("other-secret")).unwrap();
        let forged = theirs.issue_access_token_at("u1", "e", &[], None, t0()).unwrap();

        let result = ours.validate_token_at(forged.as_str(), TokenType::Access, t0());
        assert_eq!(result.failure(), Some(&TokenValidationError::InvalidSignature));
    }

    #[test]
    fn foreign_issuer_and_audience_rejected() {
        let ours = manager();
        let other_issuer = TokenLifecycleManager::new(TokenConfig {
            issuer: "someone-else".to_string(),
            ..TokenConfig::new("test-secret")
        })
        .unwrap();
        let other_audience = TokenLifecycleManager::new(TokenConfig {
            audience: "another-platform".to_string(),
            ..TokenConfig::new("test-secret")
        })
        .unwrap();

        let t = other_issuer.issue_access_token_at("u1", "e", &[], None, t0()).unwrap();
        assert_eq!(
            ours.validate_token_at(t.as_str(), TokenType::Access, t0()).failure(),
            Some(&TokenValidationError::IssuerMismatch)
        );

        let t = other_audience.issue_access_token_at("u1", "e", &[], None, t0()).unwrap();
        assert_eq!(
            ours.validate_token_at(t.as_str(), TokenType::Access, t0()).failure(),
            Some(&TokenValidationError::AudienceMismatch)
        );
    }

    #[test]
    fn tampered_payload_rejected() {
        let m = manager();
        let a = m.issue_access_token_at("u1", "e", &[], None, t0()).unwrap();
        let b = m.issue_access_token_at("admin", "e", &[], None, t0()).unwrap();

        // Splice b's payload under a's signature.
        let a_parts: Vec<&str> = a.as_str().split('.').collect();
        let b_parts: Vec<&str> = b.as_str().split('.').collect();
        let spliced = format!("{}.{}.{}", a_parts[0], b_parts[1], a_parts[2]);

        let result = m.validate_token_at(&spliced, TokenType::Access, t0());
        assert_eq!(result.failure(), Some(&TokenValidationError::InvalidSignature));
    }

    #[test]
    fn out_of_range_ttl_is_a_caller_error() {
        let m = manager();
        for ttl in [Duration::zero(), Duration::seconds(-5), Duration::hours(25)] {
            let err = m.issue_access_token_at("u1", "e", &[], Some(ttl), t0()).unwrap_err();
            assert!(matches!(err, TokenError::InvalidTtl { token_type: TokenType::Access, .. }));
        }
        let err = m
            .issue_refresh_token_at("u1", "e", &[], Some(Duration::days(91)), t0())
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidTtl { token_type: TokenType::Refresh, .. }));
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let err = TokenLifecycleManager::new(TokenConfig::default()).unwrap_err();
        assert!(matches!(err, TokenError::Config(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn refresh_rotates_both_tokens() {
        let m = manager();
        let access = m.issue_access_token_at("u1", "u1@example.com", &perms(), None, t0()).unwrap();
        let refresh = m.issue_refresh_token_at("u1", "u1@example.com", &perms(), None, t0()).unwrap();

        let rotated = m.refresh_access_token_at(refresh.as_str(), t0()).unwrap();
        assert_ne!(rotated.access_token.as_str(), access.as_str());
        assert_ne!(rotated.refresh_token.as_str(), refresh.as_str());
        assert_eq!(rotated.access_token.claims().token_type, TokenType::Access);
        assert_eq!(rotated.refresh_token.claims().token_type, TokenType::Refresh);
        assert_eq!(rotated.access_token.claims().sub, "u1");
        assert_eq!(rotated.access_token.claims().permissions, perms());

        // No single-use enforcement: the old refresh token keeps working.
        assert!(m.validate_token_at(refresh.as_str(), TokenType::Refresh, t0()).is_valid());
    }

    #[test]
    fn refresh_with_access_token_fails() {
        let m = manager();
        let access = m.issue_access_token_at("u1", "e", &[], None, t0()).unwrap();
        let err = m.refresh_access_token_at(access.as_str(), t0()).unwrap_err();
        assert!(matches!(
            err,
            TokenError::InvalidRefreshToken(TokenValidationError::WrongType { .. })
        ));
    }

    #[test]
    fn refresh_with_expired_or_garbage_token_fails() {
        let m = manager();
        let refresh = m
            .issue_refresh_token_at("u1", "e", &[], Some(Duration::hours(1)), t0())
            .unwrap();
        let err = m
            .refresh_access_token_at(refresh.as_str(), t0() + Duration::hours(2))
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidRefreshToken(TokenValidationError::Expired)));

        let err = m.refresh_access_token_at("garbage", t0()).unwrap_err();
        assert!(matches!(err, TokenError::InvalidRefreshToken(TokenValidationError::Malformed(_))));
    }

    #[test]
    fn parallel_validation_keeps_claims_isolated() {
        let m = manager();
        let tokens: Vec<(String, IssuedToken)> = (0..16)
            .map(|i| {
                let user = format!("user-{i}");
                let token = m
                    .issue_access_token_at(&user, &format!("{user}@example.com"), &[], None, t0())
                    .unwrap();
                (user, token)
            })
            .collect();

        std::thread::scope(|scope| {
            for (user, token) in &tokens {
                let m = &m;
                scope.spawn(move || {
                    for _ in 0..20 {
                        let result = m.validate_token_at(token.as_str(), TokenType::Access, t0());
                        assert_eq!(result.subject(), Some(user.as_str()));
                    }
                });
            }
        });
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// A token is only ever valid as the kind it was issued as.
        #[test]
        fn token_type_is_enforced(
            sub in "[a-z0-9-]{1,24}",
            perms in prop::collection::vec("[a-z:]{1,12}", 0..4),
            as_refresh in any::<bool>(),
        ) {
            let m = manager();
            let perms: Vec<Permission> = perms.into_iter().map(Permission::from).collect();
            let (issued, kind, other) = if as_refresh {
                (m.issue_refresh_token_at(&sub, "e", &perms, None, t0()).unwrap(), TokenType::Refresh, TokenType::Access)
            } else {
                (m.issue_access_token_at(&sub, "e", &perms, None, t0()).unwrap(), TokenType::Access, TokenType::Refresh)
            };

            let ok = m.validate_token_at(issued.as_str(), kind, t0());
            prop_assert!(ok.is_valid());
            prop_assert_eq!(ok.subject(), Some(sub.as_str()));
            prop_assert_eq!(ok.permissions(), Some(perms.as_slice()));
            prop_assert!(!m.validate_token_at(issued.as_str(), other, t0()).is_valid());
        }

        /// Valid for the whole ttl, invalid from the moment it elapses.
        #[test]
        fn expiry_is_monotonic(ttl_secs in 1i64..86_400, offset in 0i64..200_000) {
            let m = manager();
            let issued = m
                .issue_access_token_at("u1", "e", &[], Some(Duration::seconds(ttl_secs)), t0())
                .unwrap();
            let valid = m
                .validate_token_at(issued.as_str(), TokenType::Access, t0() + Duration::seconds(offset))
                .is_valid();
            prop_assert_eq!(valid, offset < ttl_secs);
        }

        /// Arbitrary strings never validate and never panic.
        #[test]
        fn arbitrary_input_never_validates(input in ".{0,200}") {
            let m = manager();
            prop_assert!(!m.validate_token_at(&input, TokenType::Access, t0()).is_valid());
        }
    }
}
