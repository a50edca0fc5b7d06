//! Cross-service authorization request contract.
//!
//! Deserialization is lenient. Numbers and `true` are taken as their text, so
//! `"user_id": 42` names user `"42"`. Absent fields, `null`, `false`, zero,
//! arrays, objects and a non-object `user_context` all parse as empty, and the
//! authorizer then denies them as missing fields rather than failing to decode.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Who the request is on behalf of.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tier: String,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tier: tier.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.user_id.is_empty() && !self.tier.is_empty()
    }
}

/// A single (service, resource, operation) check for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub requesting_service: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub target_resource: String,
    #[serde(default, deserialize_with = "lenient_context")]
    pub user_context: Option<UserContext>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub operation: String,
}

impl AuthorizationRequest {
    pub fn new(
        requesting_service: impl Into<String>,
        target_resource: impl Into<String>,
        user_context: UserContext,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            requesting_service: requesting_service.into(),
            target_resource: target_resource.into(),
            user_context: Some(user_context),
            operation: operation.into(),
        }
    }

    /// The user context, if every mandatory field is present and non-empty.
    pub fn complete_user_context(&self) -> Option<&UserContext> {
        if self.requesting_service.is_empty()
            || self.target_resource.is_empty()
            || self.operation.is_empty()
        {
            return None;
        }
        self.user_context.as_ref().filter(|ctx| ctx.is_complete())
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(scalar_text).unwrap_or_default())
}

fn lenient_context<'de, D>(deserializer: D) -> Result<Option<UserContext>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => Some(UserContext {
            user_id: string_field(&map, "user_id"),
            tier: string_field(&map, "tier"),
        }),
        _ => None,
    })
}

fn string_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key).map(scalar_text).unwrap_or_default()
}

/// Text of a truthy scalar; empty for anything else.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "true".to_string(),
        Value::Number(n) if n.as_f64() != Some(0.0) => n.to_string(),
        _ => String::new(),
    }
}
