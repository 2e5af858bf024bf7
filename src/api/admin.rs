use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};

use super::AppState;
use crate::middleware::{require_authorized, ErrorResponse, Policy};
use crate::models::user::UserRole;
use crate::scheduler::{JobRunOutcome, SchedulerStatus};

const SCHEDULER_ADMIN: Policy =
    Policy::roles(&[UserRole::SystemOwner, UserRole::Admin]).with_scopes(&["admin:scheduler"]);

type Rejection = (StatusCode, Json<ErrorResponse>);

/// Background scheduler introspection.
///
/// **Auth: Admin or SystemOwner, admin:scheduler**
pub async fn scheduler_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SchedulerStatus>, Rejection> {
    require_authorized(&state.db, &headers, &SCHEDULER_ADMIN).await?;
    Ok(Json(state.scheduler.status()))
}

/// Run one scheduled job immediately, off-schedule. Unknown job names come
/// back as `success: false`, not as an HTTP error.
///
/// **Auth: Admin or SystemOwner, admin:scheduler**
pub async fn run_scheduler_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_name): Path<String>,
) -> Result<Json<JobRunOutcome>, Rejection> {
    let user = require_authorized(&state.db, &headers, &SCHEDULER_ADMIN).await?;

    tracing::info!(job = %job_name, requested_by = %user.email, "Manual job trigger");
    let outcome = state.scheduler.execute_now(&job_name).await;
    Ok(Json(outcome))
}
