//! Bearer token -> user context -> cross-service verdict.
//!
//! This is the glue an HTTP/RPC layer calls per request; it owns no transport
//! concerns itself.

use std::collections::HashMap;
use std::sync::Arc;

use netra_core::LookupKey;

use crate::authorize::{AuthorizationResult, CrossServiceAuthorizer};
use crate::claims::{TokenType, TokenValidationError};
use crate::config::AuthConfig;
use crate::request::{AuthorizationRequest, UserContext};
use crate::tokens::{TokenError, TokenLifecycleManager};

/// Source of a user's subscription tier.
pub trait TierLookup: Send + Sync {
    fn tier_for(&self, user_id: &str) -> Option<String>;
}

impl TierLookup for HashMap<String, String> {
    fn tier_for(&self, user_id: &str) -> Option<String> {
        self.get(user_id).cloned()
    }
}

impl<F> TierLookup for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn tier_for(&self, user_id: &str) -> Option<String> {
        self(user_id)
    }
}

/// Result of [`AuthGuard::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// No usable access token; authorization was not attempted.
    Unauthenticated(TokenValidationError),
    /// Authenticated; carries the authorizer's verdict.
    Decided(AuthorizationResult),
}

impl GuardOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, GuardOutcome::Decided(result) if result.is_authorized())
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, TokenValidationError> {
    let header = header.ok_or(TokenValidationError::Missing)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(TokenValidationError::Missing)?
        .trim();
    if token.is_empty() {
        return Err(TokenValidationError::Missing);
    }
    Ok(token)
}

pub struct AuthGuard<L> {
    tokens: Arc<TokenLifecycleManager>,
    authorizer: CrossServiceAuthorizer,
    tiers: L,
    default_tier: LookupKey,
}

impl<L: TierLookup> AuthGuard<L> {
    pub fn new(
        tokens: Arc<TokenLifecycleManager>,
        authorizer: CrossServiceAuthorizer,
        tiers: L,
        default_tier: LookupKey,
    ) -> Self {
        Self {
            tokens,
            authorizer,
            tiers,
            default_tier,
        }
    }

    /// Build every component from one validated config.
    pub fn from_config(config: AuthConfig, tiers: L) -> Result<Self, TokenError> {
        config.validate()?;
        let AuthConfig {
            token,
            permissions,
            default_tier,
        } = config;
        Ok(Self::new(
            Arc::new(TokenLifecycleManager::new(token)?),
            CrossServiceAuthorizer::new(permissions),
            tiers,
            default_tier,
        ))
    }

    pub fn tokens(&self) -> &TokenLifecycleManager {
        &self.tokens
    }

    pub fn authorizer(&self) -> &CrossServiceAuthorizer {
        &self.authorizer
    }

    /// Authenticate the bearer and authorize `operation` on `resource` on
    /// behalf of `service`.
    pub fn check(
        &self,
        authorization_header: Option<&str>,
        service: &str,
        resource: &str,
        operation: &str,
    ) -> GuardOutcome {
        let token = match extract_bearer(authorization_header) {
            Ok(token) => token,
            Err(reason) => return GuardOutcome::Unauthenticated(reason),
        };

        let validated = match self.tokens.validate_token(token, TokenType::Access).into_result() {
            Ok(validated) => validated,
            Err(reason) => return GuardOutcome::Unauthenticated(reason),
        };

        let user_id = validated.subject();
        let tier = self.tiers.tier_for(user_id).unwrap_or_else(|| {
            tracing::debug!(user_id = %user_id, default_tier = %self.default_tier, "no tier on record; using default");
            self.default_tier.to_string()
        });

        let request = AuthorizationRequest::new(service, resource, UserContext::new(user_id, tier), operation);
        GuardOutcome::Decided(self.authorizer.validate_cross_service_request(&request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorize::DenialKind;
    use crate::config::TokenConfig;

    fn guard() -> AuthGuard<HashMap<String, String>> {
        let mut tiers = HashMap::new();
        tiers.insert("u-early".to_string(), "early".to_string());
        tiers.insert("u-ent".to_string(), "Enterprise".to_string());
        AuthGuard::from_config(AuthConfig::new(TokenConfig::new("guard-secret")), tiers).unwrap()
    }

    fn bearer(guard: &AuthGuard<HashMap<String, String>>, user: &str) -> String {
        let token = guard.tokens().issue_access_token(user, "e", &[], None).unwrap();
        format!("Bearer {}", token.as_str())
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(Some("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(extract_bearer(None), Err(TokenValidationError::Missing));
        assert_eq!(extract_bearer(Some("Basic dXNlcg==")), Err(TokenValidationError::Missing));
        assert_eq!(extract_bearer(Some("Bearer    ")), Err(TokenValidationError::Missing));
    }

    #[test]
    fn authenticated_user_is_authorized_by_tier() {
        let g = guard();
        let header = bearer(&g, "u-early");
        let outcome = g.check(Some(header.as_str()), "backend", "agent_data", "write");
        assert!(outcome.is_authorized());

        let header = bearer(&g, "u-ent");
        let outcome = g.check(Some(header.as_str()), "auth", "auth_data", "delete");
        assert!(outcome.is_authorized());
    }

    #[test]
    fn unknown_user_gets_default_tier() {
        let g = guard();
        let header = bearer(&g, "u-nobody");
        let GuardOutcome::Decided(result) = g.check(Some(header.as_str()), "backend", "user_data", "write") else {
            panic!("expected a decision");
        };
        assert_eq!(result.denial_kind(), Some(DenialKind::InsufficientTierPrivileges));
        assert!(result.denial_reason().contains("free tier"));
    }

    #[test]
    fn refresh_token_is_not_a_bearer() {
        let g = guard();
        let refresh = g.tokens().issue_refresh_token("u-early", "e", &[], None).unwrap();
        let header = format!("Bearer {}", refresh.as_str());
        let outcome = g.check(Some(header.as_str()), "backend", "user_data", "read");
        assert!(matches!(
            outcome,
            GuardOutcome::Unauthenticated(TokenValidationError::WrongType { .. })
        ));
    }

    #[test]
    fn missing_header_is_unauthenticated() {
        let g = guard();
        assert_eq!(
            g.check(None, "backend", "user_data", "read"),
            GuardOutcome::Unauthenticated(TokenValidationError::Missing)
        );
    }

    #[test]
    fn closures_work_as_tier_lookup() {
        let lookup = |user_id: &str| (user_id == "vip").then(|| "mid".to_string());
        let g = AuthGuard::from_config(AuthConfig::new(TokenConfig::new("guard-secret")), lookup).unwrap();
        let token = g.tokens().issue_access_token("vip", "e", &[], None).unwrap();
        let header = format!("Bearer {}", token.as_str());
        assert!(g.check(Some(header.as_str()), "backend", "session_data", "write").is_authorized());
    }
}
