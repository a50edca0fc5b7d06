//! Service and tier permission tables.
//!
//! Two independently maintained tables: the service table is infrastructure
//! policy (which internal service may touch which resource class, and how), the
//! tier table is business policy (what a subscription tier may do). A request
//! must satisfy both.
//!
//! Table keys (service and tier names) are case-normalized. Set members
//! (resources, operations) are matched exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use netra_core::{CoreError, CoreResult, LookupKey};

/// An ordered, duplicate-free set of names (resources or operations).
///
/// Declaration order is kept so denial payloads list operations the way the
/// table declares them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NameSet(Vec<String>);

impl NameSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        Self(out)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl<'de> Deserialize<'de> for NameSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::new(names))
    }
}

/// Infrastructure policy for one requesting service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePermissionProfile {
    pub allowed_target_resources: NameSet,
    pub default_operations: NameSet,
    pub restricted_operations: NameSet,
}

impl ServicePermissionProfile {
    pub fn new(resources: &[&str], defaults: &[&str], restricted: &[&str]) -> Self {
        Self {
            allowed_target_resources: NameSet::new(resources.iter().copied()),
            default_operations: NameSet::new(defaults.iter().copied()),
            restricted_operations: NameSet::new(restricted.iter().copied()),
        }
    }
}

/// Business policy for one subscription tier.
///
/// An empty `resource_allowlist` means every resource is reachable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPermissionProfile {
    pub allowed_operations: NameSet,
    #[serde(default)]
    pub resource_allowlist: NameSet,
}

impl TierPermissionProfile {
    pub fn new(operations: &[&str], allowlist: &[&str]) -> Self {
        Self {
            allowed_operations: NameSet::new(operations.iter().copied()),
            resource_allowlist: NameSet::new(allowlist.iter().copied()),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.resource_allowlist.is_empty()
    }

    pub fn allows_resource(&self, resource: &str) -> bool {
        self.is_unlimited() || self.resource_allowlist.contains(resource)
    }
}

/// Both permission tables, keyed by normalized service / tier name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTables {
    #[serde(default)]
    services: BTreeMap<LookupKey, ServicePermissionProfile>,
    #[serde(default)]
    tiers: BTreeMap<LookupKey, TierPermissionProfile>,
}

impl PermissionTables {
    /// Tables with no entries (every request is denied as unknown).
    pub fn empty() -> Self {
        Self {
            services: BTreeMap::new(),
            tiers: BTreeMap::new(),
        }
    }

    /// Parse tables from JSON of the form
    /// `{"services": {"<name>": {...}}, "tiers": {"<name>": {...}}}`.
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| CoreError::invalid_config(format!("permission tables: {e}")))
    }

    pub fn with_service(mut self, name: &str, profile: ServicePermissionProfile) -> Self {
        self.services.insert(LookupKey::new(name), profile);
        self
    }

    pub fn with_tier(mut self, name: &str, profile: TierPermissionProfile) -> Self {
        self.tiers.insert(LookupKey::new(name), profile);
        self
    }

    /// Look up a service profile; `name` is normalized first.
    pub fn service(&self, name: &str) -> Option<&ServicePermissionProfile> {
        self.services.get(LookupKey::new(name).as_str())
    }

    /// Look up a tier profile; `name` is normalized first.
    pub fn tier(&self, name: &str) -> Option<&TierPermissionProfile> {
        self.tiers.get(LookupKey::new(name).as_str())
    }

    /// Reject service profiles that list an operation as both default and
    /// restricted. Such a profile still decides deterministically (the
    /// restriction wins) but almost certainly reflects an editing mistake.
    pub fn validate(&self) -> CoreResult<()> {
        for (service, profile) in self.services() {
            if let Some(op) = profile
                .default_operations
                .iter()
                .find(|op| profile.restricted_operations.contains(op))
            {
                return Err(CoreError::invalid_config(format!(
                    "service '{service}' lists '{op}' as both default and restricted"
                )));
            }
        }
        Ok(())
    }

    pub fn services(&self) -> impl Iterator<Item = (&str, &ServicePermissionProfile)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn tiers(&self) -> impl Iterator<Item = (&str, &TierPermissionProfile)> {
        self.tiers.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Default for PermissionTables {
    fn default() -> Self {
        Self::empty()
            .with_service(
                "backend",
                ServicePermissionProfile::new(
                    &["user_data", "agent_data", "session_data"],
                    &["read", "write"],
                    &["delete", "admin"],
                ),
            )
            .with_service(
                "frontend",
                ServicePermissionProfile::new(
                    &["user_profile", "session_data"],
                    &["read"],
                    &["write", "delete", "admin"],
                ),
            )
            .with_service(
                "auth",
                ServicePermissionProfile::new(
                    &["user_data", "session_data", "auth_data"],
                    &["read", "write", "delete"],
                    &["admin"],
                ),
            )
            .with_tier(
                "free",
                TierPermissionProfile::new(&["read"], &["user_profile", "basic_data"]),
            )
            .with_tier(
                "early",
                TierPermissionProfile::new(&["read", "write"], &["user_data", "agent_data"]),
            )
            .with_tier(
                "mid",
                TierPermissionProfile::new(
                    &["read", "write"],
                    &["user_data", "agent_data", "session_data"],
                ),
            )
            .with_tier(
                "enterprise",
                TierPermissionProfile::new(&["read", "write", "delete"], &[]),
            )
    }
}
