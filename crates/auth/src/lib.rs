//! `netra-auth` — token lifecycle and cross-service authorization core.
//!
//! This crate is intentionally decoupled from HTTP and storage. It consumes a
//! user-tier lookup and injected configuration, and emits tokens and
//! authorization verdicts.

pub mod authorize;
pub mod claims;
pub mod config;
pub mod guard;
pub mod permissions;
pub mod policy;
pub mod request;
pub mod tokens;

pub use authorize::{
    AuthorizationExplanation, AuthorizationResult, AuthzError, CheckOutcome, CrossServiceAuthorizer,
    Denial, DenialKind, Grant,
};
pub use claims::{TokenClaims, TokenType, TokenValidationError, validate_claims};
pub use config::{AuthConfig, TokenConfig};
pub use guard::{AuthGuard, GuardOutcome, TierLookup, extract_bearer};
pub use permissions::Permission;
pub use policy::{NameSet, PermissionTables, ServicePermissionProfile, TierPermissionProfile};
pub use request::{AuthorizationRequest, UserContext};
pub use tokens::{
    IssuedToken, RefreshResult, TokenError, TokenLifecycleManager, TokenValidationResult,
    ValidatedToken,
};
