use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;
use validator::Validate;

use super::AppState;
use crate::db::queries;
use crate::middleware::rate_limit::{client_ip, rate_limit_key};
use crate::middleware::{require_authorized, ErrorResponse, Policy};
use crate::models::user::{User, UserRole, UserStatus};
use crate::utils::{generate_token, hash_password, hash_token, verify_password};

/// Stricter per-IP pair for credential endpoints, on top of the global
/// middleware limit.
const LOGIN_MAX_ATTEMPTS: u32 = 10;
const LOGIN_WINDOW_SECONDS: u64 = 300;

const BASELINE: Policy = Policy::any_authenticated();

type Rejection = (StatusCode, Json<ErrorResponse>);

fn db_error(e: sqlx::Error) -> Rejection {
    tracing::error!("Database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error", "DB_ERROR")),
    )
}

fn invalid_credentials() -> Rejection {
    // One body for every credential failure mode.
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new(
            "Invalid email or password",
            "INVALID_CREDENTIALS",
        )),
    )
}

// ============================================
// Request / Response Types
// ============================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 120))]
    pub organization_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(max = 120))]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub email: String,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub organization_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

fn validation_error(e: validator::ValidationErrors) -> Rejection {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(
            ErrorResponse::new("Validation failed", "VALIDATION_ERROR")
                .with_details(e.to_string()),
        ),
    )
}

// ============================================
// Handlers
// ============================================

/// Bootstrap a new organization on a trial plan with its first admin.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), Rejection> {
    req.validate().map_err(validation_error)?;

    let email = req.email.trim().to_lowercase();

    let existing = sqlx::query("SELECT id FROM app_user WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?;
    if existing.is_some() {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(
                "An account with this email already exists",
                "EMAIL_TAKEN",
            )),
        ));
    }

    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!("Password hashing failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Internal server error", "HASH_ERROR")),
        )
    })?;

    let slug = format!(
        "org-{}",
        Uuid::new_v4().to_string().replace("-", "")[..12].to_string()
    );

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let org_row = sqlx::query(
        r#"
        INSERT INTO organization (name, slug, status)
        VALUES ($1, $2, 'trial')
        RETURNING id
        "#,
    )
    .bind(req.organization_name.trim())
    .bind(&slug)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_error)?;
    let organization_id: Uuid = org_row.get("id");

    let user_row = sqlx::query(
        r#"
        INSERT INTO app_user (organization_id, email, full_name, password_hash, role, status)
        VALUES ($1, $2, $3, $4, 'admin', 'active')
        RETURNING id
        "#,
    )
    .bind(organization_id)
    .bind(&email)
    .bind(&req.full_name)
    .bind(&password_hash)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_error)?;
    let user_id: Uuid = user_row.get("id");

    tx.commit().await.map_err(db_error)?;

    tracing::info!(%organization_id, %user_id, "Organization registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            organization_id,
            user_id,
        }),
    ))
}

/// Exchange credentials for an opaque bearer token.
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, Rejection> {
    let ip = client_ip(&headers, &addr);
    let key = format!("login:{}", rate_limit_key(None, Some(&ip)));
    if !state
        .rate_limiter
        .check(&key, LOGIN_MAX_ATTEMPTS, LOGIN_WINDOW_SECONDS)
    {
        tracing::warn!(ip = %ip, "Login rate limit exceeded");
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new(
                "Too many login attempts. Please try again later.",
                "RATE_LIMITED",
            )),
        ));
    }

    req.validate().map_err(validation_error)?;

    let email = req.email.trim().to_lowercase();

    let row = sqlx::query(
        r#"
        SELECT id, organization_id, email, full_name, password_hash, role, status
        FROM app_user
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(invalid_credentials)?;

    let password_hash: String = row.get("password_hash");
    if !verify_password(&req.password, &password_hash) {
        return Err(invalid_credentials());
    }

    let role_str: String = row.get("role");
    let status_str: String = row.get("status");
    let (role, status) = match (UserRole::parse(&role_str), UserStatus::parse(&status_str)) {
        (Some(r), Some(s)) => (r, s),
        _ => {
            tracing::error!(role = %role_str, status = %status_str, "Unparseable account row");
            return Err(invalid_credentials());
        }
    };

    if status != UserStatus::Active {
        tracing::warn!(email = %email, status = %status_str, "Login refused for inactive account");
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(
                "This account is not active.",
                "ACCOUNT_INACTIVE",
            )),
        ));
    }

    let user_id: Uuid = row.get("id");
    let organization_id: Option<Uuid> = row.get("organization_id");

    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(state.config.token_ttl_hours);
    let issued = queries::insert_token(&state.db, user_id, &hash_token(&token), expires_at)
        .await
        .map_err(db_error)?;

    let _ = sqlx::query("UPDATE app_user SET last_login_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(&state.db)
        .await;

    if let Err(e) = queries::record_activity(
        &state.db,
        organization_id,
        Some(user_id),
        "login",
        Some(serde_json::json!({ "token_id": issued.id, "ip": ip })),
    )
    .await
    {
        tracing::warn!("Failed to record login activity: {}", e);
    }

    Ok(Json(TokenResponse {
        token,
        expires_at,
        user: UserResponse {
            id: user_id,
            organization_id,
            email,
            full_name: row.get("full_name"),
            role,
            status,
        },
    }))
}

/// Rotate the current token: revoke it and issue a fresh one.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, Rejection> {
    let user = require_authorized(&state.db, &headers, &BASELINE).await?;

    queries::revoke_token(&state.db, user.token_id)
        .await
        .map_err(db_error)?;

    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(state.config.token_ttl_hours);
    let issued = queries::insert_token(&state.db, user.id, &hash_token(&token), expires_at)
        .await
        .map_err(db_error)?;

    tracing::debug!(
        old_token = %user.token_id,
        new_token = %issued.id,
        "Token rotated"
    );

    let row = sqlx::query("SELECT full_name FROM app_user WHERE id = $1")
        .bind(user.id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(TokenResponse {
        token,
        expires_at,
        user: UserResponse {
            id: user.id,
            organization_id: user.organization_id,
            email: user.email,
            full_name: row.get("full_name"),
            role: user.role,
            status: user.status,
        },
    }))
}

/// Revoke the presented token.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>, Rejection> {
    let user = require_authorized(&state.db, &headers, &BASELINE).await?;

    queries::revoke_token(&state.db, user.token_id)
        .await
        .map_err(db_error)?;

    if let Err(e) =
        queries::record_activity(&state.db, user.organization_id, Some(user.id), "logout", None)
            .await
    {
        tracing::warn!("Failed to record logout activity: {}", e);
    }

    Ok(Json(LogoutResponse { success: true }))
}

/// Current account profile.
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<User>, Rejection> {
    let user = require_authorized(&state.db, &headers, &BASELINE).await?;

    let row = sqlx::query(
        r#"
        SELECT full_name, two_factor_enabled, last_login_at, last_activity_at,
               created_at, updated_at
        FROM app_user
        WHERE id = $1
        "#,
    )
    .bind(user.id)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(User {
        id: user.id,
        organization_id: user.organization_id,
        email: user.email,
        full_name: row.get("full_name"),
        role: user.role,
        status: user.status,
        two_factor_enabled: row.get("two_factor_enabled"),
        last_login_at: row.get("last_login_at"),
        last_activity_at: row.get("last_activity_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}
