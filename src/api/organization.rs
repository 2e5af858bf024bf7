use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use sqlx::Row;
use uuid::Uuid;
use validator::Validate;

use super::AppState;
use crate::middleware::{require_authorized, ErrorResponse, Policy};
use crate::models::organization::{Organization, OrganizationStatus};
use crate::models::user::UserRole;

const MEMBER: Policy = Policy::any_authenticated();
const MANAGE: Policy = Policy::roles(&[UserRole::SystemOwner, UserRole::Admin]);

type Rejection = (StatusCode, Json<ErrorResponse>);

fn db_error(e: sqlx::Error) -> Rejection {
    tracing::error!("Database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error", "DB_ERROR")),
    )
}

// ============================================
// Request Types
// ============================================

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateOrganizationRequest {
    #[validate(length(min = 2, max = 120))]
    pub name: String,
}

fn org_required() -> Rejection {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(
            "This account is not attached to an organization",
            "ORG_REQUIRED",
        )),
    )
}

async fn fetch_organization(state: &AppState, org_id: Uuid) -> Result<Organization, Rejection> {
    let row = sqlx::query(
        "SELECT id, name, slug, status, created_at, updated_at FROM organization WHERE id = $1",
    )
    .bind(org_id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(org_required)?;

    let status_str: String = row.get("status");
    let status = OrganizationStatus::parse(&status_str).ok_or_else(|| {
        tracing::error!(status = %status_str, organization_id = %org_id, "Unknown organization status");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Internal server error", "DATA_ERROR")),
        )
    })?;

    Ok(Organization {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================
// Handlers
// ============================================

/// Current organization details.
///
/// **Auth: any active member**
pub async fn get_current_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Organization>, Rejection> {
    let user = require_authorized(&state.db, &headers, &MEMBER).await?;
    let org_id = user.organization_id.ok_or_else(org_required)?;
    Ok(Json(fetch_organization(&state, org_id).await?))
}

/// Rename the current organization.
///
/// **Auth: Admin or SystemOwner**
pub async fn update_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateOrganizationRequest>,
) -> Result<Json<Organization>, Rejection> {
    let user = require_authorized(&state.db, &headers, &MANAGE).await?;
    let org_id = user.organization_id.ok_or_else(org_required)?;

    req.validate().map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(
                ErrorResponse::new("Validation failed", "VALIDATION_ERROR")
                    .with_details(e.to_string()),
            ),
        )
    })?;

    sqlx::query("UPDATE organization SET name = $1, updated_at = NOW() WHERE id = $2")
        .bind(req.name.trim())
        .bind(org_id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(fetch_organization(&state, org_id).await?))
}
