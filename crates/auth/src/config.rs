//! Injected configuration for the token and authorization layers.
//!
//! Nothing here reads the environment or the filesystem: the embedding service
//! resolves values however it likes and hands over these structs.

use chrono::Duration;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Deserializer, Serialize};

use netra_core::{CoreError, CoreResult, LookupKey};

use crate::policy::PermissionTables;

pub const DEFAULT_ISSUER: &str = "netra-auth-service";
pub const DEFAULT_AUDIENCE: &str = "netra-platform";

const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_MAX_ACCESS_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MAX_REFRESH_TTL_SECS: u64 = 90 * 24 * 60 * 60;

/// Upper bound for any configured duration (ten years).
const TTL_CEILING_SECS: u64 = 10 * 365 * 24 * 60 * 60;
const MAX_LEEWAY_SECS: u64 = 5 * 60;

/// Token signing and lifetime settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Shared HMAC secret.
    #[serde(skip_serializing)]
    pub secret: String,
    pub algorithm: Algorithm,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub max_access_ttl_secs: u64,
    pub max_refresh_ttl_secs: u64,
    /// Clock skew tolerated on both ends of the validity window.
    pub leeway_secs: u64,
}

impl TokenConfig {
    /// Defaults with the given secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.secret.is_empty() {
            return Err(CoreError::invalid_config("token secret must not be empty"));
        }
        if !matches!(
            self.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(CoreError::invalid_config(format!(
                "algorithm {:?} is not supported; only HMAC (HS256/HS384/HS512) works with a shared secret",
                self.algorithm
            )));
        }
        if self.issuer.is_empty() || self.audience.is_empty() {
            return Err(CoreError::invalid_config("issuer and audience must not be empty"));
        }
        check_ttl("access", self.access_ttl_secs, self.max_access_ttl_secs)?;
        check_ttl("refresh", self.refresh_ttl_secs, self.max_refresh_ttl_secs)?;
        if self.leeway_secs > MAX_LEEWAY_SECS {
            return Err(CoreError::invalid_config(format!(
                "leeway of {}s exceeds the {}s limit",
                self.leeway_secs, MAX_LEEWAY_SECS
            )));
        }
        Ok(())
    }

    pub fn access_ttl(&self) -> Duration {
        seconds(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        seconds(self.refresh_ttl_secs)
    }

    pub fn max_access_ttl(&self) -> Duration {
        seconds(self.max_access_ttl_secs)
    }

    pub fn max_refresh_ttl(&self) -> Duration {
        seconds(self.max_refresh_ttl_secs)
    }

    pub fn leeway(&self) -> Duration {
        seconds(self.leeway_secs)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            algorithm: Algorithm::HS256,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
            max_access_ttl_secs: DEFAULT_MAX_ACCESS_TTL_SECS,
            max_refresh_ttl_secs: DEFAULT_MAX_REFRESH_TTL_SECS,
            leeway_secs: 0,
        }
    }
}

impl core::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("max_access_ttl_secs", &self.max_access_ttl_secs)
            .field("max_refresh_ttl_secs", &self.max_refresh_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

fn check_ttl(kind: &str, default_secs: u64, max_secs: u64) -> CoreResult<()> {
    if default_secs == 0 {
        return Err(CoreError::invalid_config(format!("{kind} ttl must be positive")));
    }
    if max_secs > TTL_CEILING_SECS {
        return Err(CoreError::invalid_config(format!(
            "maximum {kind} ttl of {max_secs}s exceeds the {TTL_CEILING_SECS}s ceiling"
        )));
    }
    if default_secs > max_secs {
        return Err(CoreError::invalid_config(format!(
            "{kind} ttl of {default_secs}s exceeds the configured maximum of {max_secs}s"
        )));
    }
    Ok(())
}

fn seconds(secs: u64) -> Duration {
    // Bounded by TTL_CEILING_SECS so the conversion cannot overflow.
    Duration::seconds(secs.min(TTL_CEILING_SECS) as i64)
}

/// Everything the request guard needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token: TokenConfig,
    #[serde(default)]
    pub permissions: PermissionTables,
    /// Tier assumed when the tier lookup has no entry for a user.
    #[serde(default = "default_tier", deserialize_with = "non_empty_tier")]
    pub default_tier: LookupKey,
}

fn default_tier() -> LookupKey {
    LookupKey::new("free")
}

fn non_empty_tier<'de, D>(deserializer: D) -> Result<LookupKey, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

impl AuthConfig {
    pub fn new(token: TokenConfig) -> Self {
        Self {
            token,
            permissions: PermissionTables::default(),
            default_tier: default_tier(),
        }
    }

    /// Replace the fallback tier. Empty names are rejected.
    pub fn with_default_tier(mut self, tier: &str) -> CoreResult<Self> {
        self.default_tier = LookupKey::parse(tier)?;
        Ok(self)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.token.validate()?;
        self.permissions.validate()?;
        if self.permissions.tier(self.default_tier.as_str()).is_none() {
            return Err(CoreError::invalid_config(format!(
                "default tier '{}' has no permission profile",
                self.default_tier
            )));
        }
        Ok(())
    }
}
