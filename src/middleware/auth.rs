use axum::{
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::models::organization::OrganizationStatus;
use crate::models::user::{UserRole, UserStatus};
use crate::utils::hash_token;

// ============================================
// Authenticated Principal
// ============================================

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub email: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub token_id: Uuid,
}

// ============================================
// Error Types
// ============================================

#[derive(Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Internal reason a valid credential was still refused. Logged server-side;
/// the HTTP body carries only a generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    AccountInactive,
    OrgInactive,
    InsufficientRole,
    MissingScope,
}

impl ForbiddenReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForbiddenReason::AccountInactive => "account_inactive",
            ForbiddenReason::OrgInactive => "org_inactive",
            ForbiddenReason::InsufficientRole => "insufficient_role",
            ForbiddenReason::MissingScope => "missing_scope",
        }
    }
}

impl std::fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing, malformed, expired, or revoked credential, or a credential
    /// that no longer resolves to a live user. Deliberately undifferentiated.
    #[error("authentication required")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(ForbiddenReason),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type AuthRejection = (StatusCode, Json<ErrorResponse>);

impl AuthError {
    /// Collapse into the uniform HTTP rejection. All authentication failure
    /// modes share one body so callers cannot probe which step failed.
    pub fn into_rejection(self) -> AuthRejection {
        match self {
            AuthError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "Authentication required. Provide a valid bearer token.",
                    "UNAUTHENTICATED",
                )),
            ),
            AuthError::Forbidden(reason) => {
                tracing::warn!(reason = %reason, "Request forbidden");
                (
                    StatusCode::FORBIDDEN,
                    Json(ErrorResponse::new(
                        "You do not have permission to perform this action.",
                        "FORBIDDEN",
                    )),
                )
            }
            AuthError::Database(e) => {
                tracing::error!("Auth database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("Internal server error", "DB_ERROR")),
                )
            }
        }
    }
}

// ============================================
// Per-Endpoint Policy
// ============================================

/// Authorization requirements attached to a route. Constructed as consts at
/// each handler; evaluated generically by `authorize`. An empty role set
/// means any role; an empty scope set means no scope requirement beyond a
/// valid, active principal.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub allowed_roles: &'static [UserRole],
    pub required_scopes: &'static [&'static str],
}

impl Policy {
    pub const fn any_authenticated() -> Self {
        Self {
            allowed_roles: &[],
            required_scopes: &[],
        }
    }

    pub const fn roles(allowed_roles: &'static [UserRole]) -> Self {
        Self {
            allowed_roles,
            required_scopes: &[],
        }
    }

    pub const fn with_scopes(mut self, required_scopes: &'static [&'static str]) -> Self {
        self.required_scopes = required_scopes;
        self
    }
}

/// Static role→capability table. Exhaustive over `UserRole`; adding a role
/// variant forces an entry here.
pub fn role_scopes(role: UserRole) -> &'static [&'static str] {
    match role {
        UserRole::SystemOwner => &[
            "platform:manage",
            "users:manage",
            "properties:read",
            "properties:write",
            "clients:read",
            "clients:write",
            "rentals:read",
            "rentals:write",
            "payments:read",
            "payments:write",
            "payroll:read",
            "payroll:write",
            "inventory:read",
            "inventory:write",
            "tasks:read",
            "tasks:write",
            "tasks:complete",
            "reports:read",
            "admin:scheduler",
        ],
        UserRole::Admin => &[
            "users:manage",
            "properties:read",
            "properties:write",
            "clients:read",
            "clients:write",
            "rentals:read",
            "rentals:write",
            "payments:read",
            "payments:write",
            "payroll:read",
            "payroll:write",
            "inventory:read",
            "inventory:write",
            "tasks:read",
            "tasks:write",
            "tasks:complete",
            "reports:read",
            "admin:scheduler",
        ],
        UserRole::Manager => &[
            "properties:read",
            "properties:write",
            "clients:read",
            "clients:write",
            "rentals:read",
            "rentals:write",
            "inventory:read",
            "tasks:read",
            "tasks:write",
            "reports:read",
        ],
        UserRole::Accountant => &[
            "rentals:read",
            "payments:read",
            "payments:write",
            "payroll:read",
            "payroll:write",
            "reports:read",
        ],
        UserRole::TechnicalStaff => &["tasks:read", "tasks:complete"],
        UserRole::Cleaner => &["tasks:read", "tasks:complete"],
        UserRole::Storekeeper => &["inventory:read", "inventory:write", "tasks:read"],
    }
}

// ============================================
// Token Authentication
// ============================================

/// Resolve the `Authorization: Bearer <token>` header to a live user.
/// Expiry and revocation are enforced in the lookup itself; every failure
/// mode collapses to `Unauthenticated`.
pub async fn authenticate(db: &PgPool, headers: &HeaderMap) -> Result<CurrentUser, AuthError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Err(AuthError::Unauthenticated),
    };

    let token_hash = hash_token(token);

    let row = sqlx::query(
        r#"
        SELECT
            t.id AS token_id,
            u.id AS user_id,
            u.organization_id,
            u.email,
            u.role,
            u.status
        FROM auth_token t
        JOIN app_user u ON t.user_id = u.id
        WHERE t.token_hash = $1
          AND t.expires_at > NOW()
          AND t.revoked = FALSE
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(db)
    .await?
    .ok_or(AuthError::Unauthenticated)?;

    let role_str: String = row.get("role");
    let status_str: String = row.get("status");

    let role = match UserRole::parse(&role_str) {
        Some(r) => r,
        None => {
            tracing::error!(role = %role_str, "Unknown role value in app_user row");
            return Err(AuthError::Unauthenticated);
        }
    };
    let status = match UserStatus::parse(&status_str) {
        Some(s) => s,
        None => {
            tracing::error!(status = %status_str, "Unknown status value in app_user row");
            return Err(AuthError::Unauthenticated);
        }
    };

    let user = CurrentUser {
        id: row.get("user_id"),
        organization_id: row.get("organization_id"),
        email: row.get("email"),
        role,
        status,
        token_id: row.get("token_id"),
    };

    // Best-effort activity tracking; a failure here never blocks the request.
    let _ = sqlx::query("UPDATE app_user SET last_activity_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(db)
        .await;

    Ok(user)
}

// ============================================
// Authorization Gate
// ============================================

/// Pure policy evaluation. `org_status` is the status of the user's
/// organization when one applies (`None` for system owners and for
/// organization-less users).
pub fn evaluate_policy(
    user: &CurrentUser,
    org_status: Option<OrganizationStatus>,
    policy: &Policy,
) -> Result<(), ForbiddenReason> {
    if user.status != UserStatus::Active {
        return Err(ForbiddenReason::AccountInactive);
    }

    if user.role != UserRole::SystemOwner {
        if let Some(status) = org_status {
            if !status.is_operational() {
                return Err(ForbiddenReason::OrgInactive);
            }
        }
    }

    if !policy.allowed_roles.is_empty() && !policy.allowed_roles.contains(&user.role) {
        return Err(ForbiddenReason::InsufficientRole);
    }

    let scopes = role_scopes(user.role);
    for required in policy.required_scopes {
        if !scopes.contains(required) {
            return Err(ForbiddenReason::MissingScope);
        }
    }

    Ok(())
}

/// Full authorization chain: authenticate, then active-status, tenant,
/// role, and scope checks. First failure short-circuits.
pub async fn authorize(
    db: &PgPool,
    headers: &HeaderMap,
    policy: &Policy,
) -> Result<CurrentUser, AuthError> {
    let user = authenticate(db, headers).await?;

    let org_status = match (user.role, user.organization_id) {
        (UserRole::SystemOwner, _) | (_, None) => None,
        (_, Some(org_id)) => {
            let row = sqlx::query("SELECT status FROM organization WHERE id = $1")
                .bind(org_id)
                .fetch_optional(db)
                .await?;
            match row {
                Some(row) => {
                    let status_str: String = row.get("status");
                    match OrganizationStatus::parse(&status_str) {
                        Some(s) => Some(s),
                        None => {
                            tracing::error!(
                                status = %status_str,
                                organization_id = %org_id,
                                "Unknown organization status"
                            );
                            return Err(AuthError::Forbidden(ForbiddenReason::OrgInactive));
                        }
                    }
                }
                None => {
                    tracing::error!(
                        organization_id = %org_id,
                        "User references a missing organization"
                    );
                    return Err(AuthError::Forbidden(ForbiddenReason::OrgInactive));
                }
            }
        }
    };

    evaluate_policy(&user, org_status, policy).map_err(AuthError::Forbidden)?;
    Ok(user)
}

/// Handler-facing wrapper that maps failures to the uniform HTTP rejection.
pub async fn require_authorized(
    db: &PgPool,
    headers: &HeaderMap,
    policy: &Policy,
) -> Result<CurrentUser, AuthRejection> {
    authorize(db, headers, policy)
        .await
        .map_err(AuthError::into_rejection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole, status: UserStatus, org: Option<Uuid>) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            organization_id: org,
            email: "staff@example.com".to_string(),
            role,
            status,
            token_id: Uuid::new_v4(),
        }
    }

    const ANY: Policy = Policy::any_authenticated();
    const ADMIN_ONLY: Policy = Policy::roles(&[UserRole::Admin, UserRole::SystemOwner]);
    const PAYROLL: Policy = Policy::any_authenticated().with_scopes(&["payroll:write"]);

    #[test]
    fn inactive_account_beats_everything() {
        let u = user(UserRole::SystemOwner, UserStatus::Suspended, None);
        assert_eq!(
            evaluate_policy(&u, None, &ANY),
            Err(ForbiddenReason::AccountInactive)
        );

        let u = user(UserRole::Admin, UserStatus::Pending, Some(Uuid::new_v4()));
        assert_eq!(
            evaluate_policy(&u, Some(OrganizationStatus::Active), &ADMIN_ONLY),
            Err(ForbiddenReason::AccountInactive)
        );
    }

    #[test]
    fn system_owner_ignores_org_status() {
        let u = user(UserRole::SystemOwner, UserStatus::Active, None);
        assert_eq!(evaluate_policy(&u, None, &ANY), Ok(()));

        // Even with an inactive org attached, the owner passes.
        let u = user(UserRole::SystemOwner, UserStatus::Active, Some(Uuid::new_v4()));
        assert_eq!(
            evaluate_policy(&u, Some(OrganizationStatus::Cancelled), &ANY),
            Ok(())
        );
    }

    #[test]
    fn suspended_org_blocks_members() {
        let u = user(UserRole::Admin, UserStatus::Active, Some(Uuid::new_v4()));
        assert_eq!(
            evaluate_policy(&u, Some(OrganizationStatus::Suspended), &ANY),
            Err(ForbiddenReason::OrgInactive)
        );
        assert_eq!(
            evaluate_policy(&u, Some(OrganizationStatus::Trial), &ANY),
            Ok(())
        );
    }

    #[test]
    fn role_outside_allowed_set_is_rejected() {
        let u = user(UserRole::Cleaner, UserStatus::Active, Some(Uuid::new_v4()));
        assert_eq!(
            evaluate_policy(&u, Some(OrganizationStatus::Active), &ADMIN_ONLY),
            Err(ForbiddenReason::InsufficientRole)
        );
    }

    #[test]
    fn missing_scope_is_rejected() {
        let u = user(UserRole::Cleaner, UserStatus::Active, Some(Uuid::new_v4()));
        assert_eq!(
            evaluate_policy(&u, Some(OrganizationStatus::Active), &PAYROLL),
            Err(ForbiddenReason::MissingScope)
        );

        let u = user(UserRole::Accountant, UserStatus::Active, Some(Uuid::new_v4()));
        assert_eq!(
            evaluate_policy(&u, Some(OrganizationStatus::Active), &PAYROLL),
            Ok(())
        );
    }

    #[test]
    fn role_check_runs_before_scope_check() {
        const BOTH: Policy =
            Policy::roles(&[UserRole::Admin]).with_scopes(&["tasks:complete"]);
        // Cleaner holds the scope but not the role.
        let u = user(UserRole::Cleaner, UserStatus::Active, Some(Uuid::new_v4()));
        assert_eq!(
            evaluate_policy(&u, Some(OrganizationStatus::Active), &BOTH),
            Err(ForbiddenReason::InsufficientRole)
        );
    }

    #[test]
    fn scope_table_sanity() {
        // The owner's capability set is a superset of every other role's.
        let owner = role_scopes(UserRole::SystemOwner);
        for role in [
            UserRole::Admin,
            UserRole::Manager,
            UserRole::Accountant,
            UserRole::TechnicalStaff,
            UserRole::Cleaner,
            UserRole::Storekeeper,
        ] {
            for scope in role_scopes(role) {
                assert!(owner.contains(scope), "owner missing {}", scope);
            }
        }

        // Only the owner may manage the platform itself.
        assert!(!role_scopes(UserRole::Admin).contains(&"platform:manage"));
        assert!(!role_scopes(UserRole::Cleaner).contains(&"payroll:write"));
    }
}
