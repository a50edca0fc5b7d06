use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

use netra_core::normalize;

use crate::policy::{PermissionTables, ServicePermissionProfile, TierPermissionProfile};
use crate::request::{AuthorizationRequest, UserContext};

const MISSING_FIELDS: &str = "Missing required fields in cross-service request";

/// Internal authorizer failure.
///
/// Only observable through
/// [`CrossServiceAuthorizer::try_validate_cross_service_request`]; the
/// non-failing entry point turns it into a denial.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// The decision panicked. Carries the panic message.
    #[error("{0}")]
    Panicked(String),
}

impl AuthzError {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "authorizer panicked".to_string()
        };
        Self::Panicked(message)
    }
}

/// Which check rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    MissingFields,
    UnknownTier,
    InsufficientTierPrivileges,
    ResourceNotInTier,
    UnknownService,
    ResourceNotInService,
    RestrictedOperation,
    ValidationError,
}

/// A negative verdict: always carries a non-empty reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    kind: DenialKind,
    reason: String,
    allowed_operations: Vec<String>,
}

impl Denial {
    fn new(kind: DenialKind, reason: String, allowed_operations: Vec<String>) -> Self {
        Self {
            kind,
            reason,
            allowed_operations,
        }
    }

    pub fn kind(&self) -> DenialKind {
        self.kind
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Operations the failing check would have permitted (hinting only).
    pub fn allowed_operations(&self) -> &[String] {
        &self.allowed_operations
    }
}

/// A positive verdict for exactly one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    operation: String,
    user_context: UserContext,
    service_permissions: ServicePermissionProfile,
}

impl Grant {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn user_context(&self) -> &UserContext {
        &self.user_context
    }

    /// The requesting service's profile, attached for auditing.
    pub fn service_permissions(&self) -> &ServicePermissionProfile {
        &self.service_permissions
    }
}

/// Verdict of [`CrossServiceAuthorizer::validate_cross_service_request`].
///
/// Serializes to the flat wire shape
/// `{is_authorized, allowed_operations, denial_reason, denial_kind, user_context, service_permissions}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    Granted(Grant),
    Denied(Denial),
}

impl AuthorizationResult {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthorizationResult::Granted(_))
    }

    /// On a grant, exactly the requested operation.
    pub fn allowed_operations(&self) -> &[String] {
        match self {
            AuthorizationResult::Granted(grant) => std::slice::from_ref(&grant.operation),
            AuthorizationResult::Denied(denial) => &denial.allowed_operations,
        }
    }

    /// Empty on a grant.
    pub fn denial_reason(&self) -> &str {
        match self {
            AuthorizationResult::Granted(_) => "",
            AuthorizationResult::Denied(denial) => &denial.reason,
        }
    }

    pub fn denial_kind(&self) -> Option<DenialKind> {
        match self {
            AuthorizationResult::Granted(_) => None,
            AuthorizationResult::Denied(denial) => Some(denial.kind),
        }
    }

    pub fn user_context(&self) -> Option<&UserContext> {
        match self {
            AuthorizationResult::Granted(grant) => Some(&grant.user_context),
            AuthorizationResult::Denied(_) => None,
        }
    }

    pub fn service_permissions(&self) -> Option<&ServicePermissionProfile> {
        match self {
            AuthorizationResult::Granted(grant) => Some(&grant.service_permissions),
            AuthorizationResult::Denied(_) => None,
        }
    }
}

impl Serialize for AuthorizationResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("AuthorizationResult", 6)?;
        state.serialize_field("is_authorized", &self.is_authorized())?;
        state.serialize_field("allowed_operations", self.allowed_operations())?;
        state.serialize_field("denial_reason", self.denial_reason())?;
        state.serialize_field("denial_kind", &self.denial_kind())?;
        state.serialize_field("user_context", &self.user_context())?;
        state.serialize_field("service_permissions", &self.service_permissions())?;
        state.end()
    }
}

/// Grants or denies `(service, resource, operation)` for a user of a tier.
///
/// Both tables must agree. Checks run in a fixed order and stop at the first
/// failure: field presence, then tier (business policy), then service
/// (infrastructure policy).
///
/// - No IO
/// - No mutable state
/// - No panics
#[derive(Debug, Clone)]
pub struct CrossServiceAuthorizer {
    tables: Arc<PermissionTables>,
}

impl Default for CrossServiceAuthorizer {
    fn default() -> Self {
        Self::new(PermissionTables::default())
    }
}

impl CrossServiceAuthorizer {
    pub fn new(tables: PermissionTables) -> Self {
        Self {
            tables: Arc::new(tables),
        }
    }

    pub fn tables(&self) -> &PermissionTables {
        &self.tables
    }

    /// Decide a request. Never fails: internal errors become a denial with
    /// reason `"Validation error: <message>"` and no allowed operations.
    pub fn validate_cross_service_request(
        &self,
        request: &AuthorizationRequest,
    ) -> AuthorizationResult {
        fail_closed(request, || self.decide(request))
    }

    /// Decide a request, surfacing internal failures as `Err`.
    pub fn try_validate_cross_service_request(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResult, AuthzError> {
        catch_decision(|| self.decide(request))
    }

    fn decide(&self, request: &AuthorizationRequest) -> AuthorizationResult {
        let Some(user_context) = request.complete_user_context() else {
            return self.deny(
                request,
                Denial::new(DenialKind::MissingFields, MISSING_FIELDS.to_string(), Vec::new()),
            );
        };

        let tier = normalize(&user_context.tier);
        let service = normalize(&request.requesting_service);
        let resource = request.target_resource.as_str();
        let operation = request.operation.as_str();

        if let Err(denial) = self.validate_tier_permissions(&tier, resource, operation) {
            return self.deny(request, denial);
        }

        let profile = match self.validate_service_permissions(&service, resource, operation) {
            Ok(profile) => profile,
            Err(denial) => return self.deny(request, denial),
        };

        tracing::debug!(
            service = %service,
            tier = %tier,
            resource = %resource,
            operation = %operation,
            user_id = %user_context.user_id,
            "cross-service request authorized"
        );

        AuthorizationResult::Granted(Grant {
            operation: operation.to_string(),
            user_context: user_context.clone(),
            service_permissions: profile.clone(),
        })
    }

    /// Operations both the service's defaults and the tier allow for
    /// `resource`, for diagnostics and UI hints. Does not decide anything.
    ///
    /// `read` is included whenever neither side excludes it, even if one side
    /// declares no operations at all.
    pub fn allowed_operations_for_context(
        &self,
        service: &str,
        tier: &str,
        resource: &str,
    ) -> Vec<String> {
        let (Some(sp), Some(tp)) = (self.tables.service(service), self.tables.tier(tier)) else {
            return Vec::new();
        };
        if !sp.allowed_target_resources.contains(resource) || !tp.allows_resource(resource) {
            return Vec::new();
        }

        let mut ops: Vec<String> = sp
            .default_operations
            .iter()
            .filter(|op| tp.allowed_operations.contains(op) && !sp.restricted_operations.contains(op))
            .map(str::to_string)
            .collect();

        let service_supports_read = !sp.restricted_operations.contains("read")
            && (sp.default_operations.is_empty() || sp.default_operations.contains("read"));
        let tier_supports_read =
            tp.allowed_operations.is_empty() || tp.allowed_operations.contains("read");
        if service_supports_read && tier_supports_read && !ops.iter().any(|op| op == "read") {
            ops.insert(0, "read".to_string());
        }
        ops
    }

    fn validate_tier_permissions(
        &self,
        tier: &str,
        resource: &str,
        operation: &str,
    ) -> Result<&TierPermissionProfile, Denial> {
        let Some(profile) = self.tables.tier(tier) else {
            return Err(Denial::new(
                DenialKind::UnknownTier,
                format!("Unknown user tier: {tier}"),
                vec!["read".to_string()],
            ));
        };

        if !profile.allowed_operations.contains(operation) {
            return Err(Denial::new(
                DenialKind::InsufficientTierPrivileges,
                format!("Insufficient privileges: {tier} tier cannot perform {operation}"),
                profile.allowed_operations.to_vec(),
            ));
        }

        if !profile.allows_resource(resource) {
            return Err(Denial::new(
                DenialKind::ResourceNotInTier,
                format!("Resource {resource} not available for {tier} tier"),
                profile.allowed_operations.to_vec(),
            ));
        }

        Ok(profile)
    }

    fn validate_service_permissions(
        &self,
        service: &str,
        resource: &str,
        operation: &str,
    ) -> Result<&ServicePermissionProfile, Denial> {
        let Some(profile) = self.tables.service(service) else {
            return Err(Denial::new(
                DenialKind::UnknownService,
                format!("Unknown requesting service: {service}"),
                Vec::new(),
            ));
        };

        if !profile.allowed_target_resources.contains(resource) {
            return Err(Denial::new(
                DenialKind::ResourceNotInService,
                format!("Service {service} cannot access resource {resource}"),
                profile.default_operations.to_vec(),
            ));
        }

        if profile.restricted_operations.contains(operation) {
            return Err(Denial::new(
                DenialKind::RestrictedOperation,
                format!("Operation {operation} is restricted for service {service}"),
                profile.default_operations.to_vec(),
            ));
        }

        Ok(profile)
    }

    fn deny(&self, request: &AuthorizationRequest, denial: Denial) -> AuthorizationResult {
        tracing::info!(
            service = %request.requesting_service,
            resource = %request.target_resource,
            operation = %request.operation,
            kind = ?denial.kind,
            reason = %denial.reason,
            "cross-service request denied"
        );
        AuthorizationResult::Denied(denial)
    }
}

fn catch_decision(
    decide: impl FnOnce() -> AuthorizationResult,
) -> Result<AuthorizationResult, AuthzError> {
    panic::catch_unwind(AssertUnwindSafe(decide)).map_err(AuthzError::from_panic)
}

/// Run `decide`, turning a panic into a `"Validation error: ..."` denial with
/// no allowed operations.
fn fail_closed(
    request: &AuthorizationRequest,
    decide: impl FnOnce() -> AuthorizationResult,
) -> AuthorizationResult {
    match catch_decision(decide) {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(
                service = %request.requesting_service,
                resource = %request.target_resource,
                operation = %request.operation,
                error = %err,
                "cross-service authorization failed internally"
            );
            AuthorizationResult::Denied(Denial::new(
                DenialKind::ValidationError,
                format!("Validation error: {err}"),
                Vec::new(),
            ))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one permission table check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    Failed { kind: DenialKind, reason: String },
    /// The request was too incomplete to run the check.
    Skipped,
}

impl CheckOutcome {
    fn from_check<T>(check: Result<T, Denial>) -> Self {
        match check {
            Ok(_) => CheckOutcome::Passed,
            Err(denial) => CheckOutcome::Failed {
                kind: denial.kind,
                reason: denial.reason,
            },
        }
    }

    fn failed_kind(&self) -> Option<DenialKind> {
        match self {
            CheckOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Both checks evaluated side by side, for audit and UI.
///
/// Unlike the decision path this does not stop at the first failure, so a
/// caller can see every reason a request would be refused.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub requesting_service: String,
    pub tier: String,
    pub target_resource: String,
    pub operation: String,

    /// Same verdict as `validate_cross_service_request`.
    pub granted: bool,

    pub tier_check: CheckOutcome,
    pub service_check: CheckOutcome,

    /// See [`CrossServiceAuthorizer::allowed_operations_for_context`].
    pub context_operations: Vec<String>,

    pub suggestions: Vec<String>,
}

impl CrossServiceAuthorizer {
    /// Explain why a request is (or would be) granted or denied.
    pub fn explain(&self, request: &AuthorizationRequest) -> AuthorizationExplanation {
        let granted = self.validate_cross_service_request(request).is_authorized();
        let service = normalize(&request.requesting_service);
        let tier = request
            .user_context
            .as_ref()
            .map(|ctx| normalize(&ctx.tier))
            .unwrap_or_default();
        let resource = request.target_resource.as_str();
        let operation = request.operation.as_str();

        if request.complete_user_context().is_none() {
            return AuthorizationExplanation {
                requesting_service: service,
                tier,
                target_resource: resource.to_string(),
                operation: operation.to_string(),
                granted,
                tier_check: CheckOutcome::Skipped,
                service_check: CheckOutcome::Skipped,
                context_operations: Vec::new(),
                suggestions: vec![
                    "Provide requesting_service, target_resource, operation and a user_context with user_id and tier".to_string(),
                ],
            };
        }

        let tier_check = CheckOutcome::from_check(self.validate_tier_permissions(&tier, resource, operation));
        let service_check =
            CheckOutcome::from_check(self.validate_service_permissions(&service, resource, operation));

        let mut suggestions = Vec::new();
        for kind in [tier_check.failed_kind(), service_check.failed_kind()]
            .into_iter()
            .flatten()
        {
            if let Some(s) = self.suggestion_for(kind, &service, resource, operation) {
                suggestions.push(s);
            }
        }
        if !granted && suggestions.is_empty() {
            suggestions.push(format!(
                "No tier or service in the current tables permits '{operation}' on '{resource}'"
            ));
        }

        AuthorizationExplanation {
            context_operations: self.allowed_operations_for_context(&service, &tier, resource),
            requesting_service: service,
            tier,
            target_resource: resource.to_string(),
            operation: operation.to_string(),
            granted,
            tier_check,
            service_check,
            suggestions,
        }
    }

    fn suggestion_for(
        &self,
        kind: DenialKind,
        service: &str,
        resource: &str,
        operation: &str,
    ) -> Option<String> {
        let tables = &self.tables;
        match kind {
            DenialKind::UnknownTier => {
                let known: Vec<&str> = tables.tiers().map(|(name, _)| name).collect();
                Some(format!("Known tiers: {known:?}"))
            }
            DenialKind::InsufficientTierPrivileges => {
                let tiers: Vec<&str> = tables
                    .tiers()
                    .filter(|(_, p)| p.allowed_operations.contains(operation))
                    .map(|(name, _)| name)
                    .collect();
                (!tiers.is_empty()).then(|| format!("Tiers that allow '{operation}': {tiers:?}"))
            }
            DenialKind::ResourceNotInTier => {
                let tiers: Vec<&str> = tables
                    .tiers()
                    .filter(|(_, p)| p.allows_resource(resource))
                    .map(|(name, _)| name)
                    .collect();
                (!tiers.is_empty()).then(|| format!("Tiers that can reach '{resource}': {tiers:?}"))
            }
            DenialKind::UnknownService => Some(format!(
                "Register a permission profile for service '{service}'"
            )),
            DenialKind::ResourceNotInService => {
                let services: Vec<&str> = tables
                    .services()
                    .filter(|(_, p)| p.allowed_target_resources.contains(resource))
                    .map(|(name, _)| name)
                    .collect();
                (!services.is_empty())
                    .then(|| format!("Services that can access '{resource}': {services:?}"))
            }
            DenialKind::RestrictedOperation => {
                let services: Vec<&str> = tables
                    .services()
                    .filter(|(_, p)| {
                        p.allowed_target_resources.contains(resource)
                            && !p.restricted_operations.contains(operation)
                    })
                    .map(|(name, _)| name)
                    .collect();
                (!services.is_empty()).then(|| {
                    format!("Services allowed to '{operation}' on '{resource}': {services:?}")
                })
            }
            DenialKind::MissingFields | DenialKind::ValidationError => None,
        }
    }
}
