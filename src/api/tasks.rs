use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;
use validator::Validate;

use super::AppState;
use crate::middleware::{require_authorized, ErrorResponse, Policy};
use crate::models::task::{RecurrenceFrequency, RecurringTask, Task, TaskStatus};

const READ: Policy = Policy::any_authenticated().with_scopes(&["tasks:read"]);
const WRITE: Policy = Policy::any_authenticated().with_scopes(&["tasks:write"]);
const COMPLETE: Policy = Policy::any_authenticated().with_scopes(&["tasks:complete"]);

type Rejection = (StatusCode, Json<ErrorResponse>);

fn db_error(e: sqlx::Error) -> Rejection {
    tracing::error!("Database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error", "DB_ERROR")),
    )
}

fn org_required() -> Rejection {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(
            "This account is not attached to an organization",
            "ORG_REQUIRED",
        )),
    )
}

fn corrupt_row() -> Rejection {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error", "DATA_ERROR")),
    )
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
// Request Types
// ============================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRecurringTaskRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub frequency: RecurrenceFrequency,
    /// Mon=0, required for weekly templates.
    #[validate(range(min = 0, max = 6))]
    pub weekday: Option<i16>,
    /// 1-based, required for monthly templates.
    #[validate(range(min = 1, max = 28))]
    pub day_of_month: Option<i16>,
}

// ============================================
// Row Mapping
// ============================================

fn task_from_row(row: &PgRow) -> Result<Task, Rejection> {
    let status_str: String = row.get("status");
    let status = TaskStatus::parse(&status_str).ok_or_else(|| {
        tracing::error!(status = %status_str, "Unknown task status in row");
        corrupt_row()
    })?;

    Ok(Task {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        title: row.get("title"),
        description: row.get("description"),
        assignee_id: row.get("assignee_id"),
        status,
        due_date: row.get("due_date"),
        recurring_task_id: row.get("recurring_task_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn recurring_from_row(row: &PgRow) -> Result<RecurringTask, Rejection> {
    let frequency_str: String = row.get("frequency");
    let frequency = RecurrenceFrequency::parse(&frequency_str).ok_or_else(|| {
        tracing::error!(frequency = %frequency_str, "Unknown recurrence frequency in row");
        corrupt_row()
    })?;

    Ok(RecurringTask {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        title: row.get("title"),
        description: row.get("description"),
        assignee_id: row.get("assignee_id"),
        frequency,
        weekday: row.get("weekday"),
        day_of_month: row.get("day_of_month"),
        active: row.get("active"),
        created_at: row.get("created_at"),
    })
}

const TASK_COLUMNS: &str = "id, organization_id, title, description, assignee_id, status, \
                            due_date, recurring_task_id, created_at, updated_at";

// ============================================
// Handlers
// ============================================

/// List the organization's non-cancelled tasks, oldest due first.
///
/// **Auth: tasks:read**
pub async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Task>>, Rejection> {
    let user = require_authorized(&state.db, &headers, &READ).await?;
    let org_id = user.organization_id.ok_or_else(org_required)?;

    let rows = sqlx::query(&format!(
        r#"
        SELECT {TASK_COLUMNS}
        FROM task
        WHERE organization_id = $1 AND status != $2
        ORDER BY due_date NULLS LAST, created_at
        LIMIT 500
        "#
    ))
    .bind(org_id)
    .bind(TaskStatus::Cancelled.as_str())
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    rows.iter().map(task_from_row).collect::<Result<_, _>>().map(Json)
}

/// Create a one-off task.
///
/// **Auth: tasks:write**
pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), Rejection> {
    let user = require_authorized(&state.db, &headers, &WRITE).await?;
    let org_id = user.organization_id.ok_or_else(org_required)?;

    req.validate().map_err(validation_error)?;

    let status = if req.assignee_id.is_some() {
        TaskStatus::Assigned
    } else {
        TaskStatus::Pending
    };

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO task (organization_id, title, description, assignee_id, status, due_date)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(org_id)
    .bind(req.title.trim())
    .bind(&req.description)
    .bind(req.assignee_id)
    .bind(status.as_str())
    .bind(req.due_date)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok((StatusCode::CREATED, Json(task_from_row(&row)?)))
}

/// Mark an open task completed.
///
/// **Auth: tasks:complete**
pub async fn complete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, Rejection> {
    let user = require_authorized(&state.db, &headers, &COMPLETE).await?;
    let org_id = user.organization_id.ok_or_else(org_required)?;

    let row = sqlx::query(&format!(
        r#"
        UPDATE task
        SET status = 'completed', updated_at = NOW()
        WHERE id = $1
          AND organization_id = $2
          AND status IN ('pending', 'assigned', 'in_progress')
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(task_id)
    .bind(org_id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "Task not found or not open",
                "TASK_NOT_FOUND",
            )),
        )
    })?;

    Ok(Json(task_from_row(&row)?))
}

/// List the organization's recurring task templates.
///
/// **Auth: tasks:read**
pub async fn list_recurring_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<RecurringTask>>, Rejection> {
    let user = require_authorized(&state.db, &headers, &READ).await?;
    let org_id = user.organization_id.ok_or_else(org_required)?;

    let rows = sqlx::query(
        r#"
        SELECT id, organization_id, title, description, assignee_id,
               frequency, weekday, day_of_month, active, created_at
        FROM recurring_task
        WHERE organization_id = $1 AND active = TRUE
        ORDER BY created_at
        "#,
    )
    .bind(org_id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    rows.iter()
        .map(recurring_from_row)
        .collect::<Result<_, _>>()
        .map(Json)
}

/// Create a recurring task template. The 06:00 scheduler pass instantiates
/// it on matching days.
///
/// **Auth: tasks:write**
pub async fn create_recurring_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRecurringTaskRequest>,
) -> Result<(StatusCode, Json<RecurringTask>), Rejection> {
    let user = require_authorized(&state.db, &headers, &WRITE).await?;
    let org_id = user.organization_id.ok_or_else(org_required)?;

    req.validate().map_err(validation_error)?;

    let qualifier_ok = match req.frequency {
        RecurrenceFrequency::Daily => true,
        RecurrenceFrequency::Weekly => req.weekday.is_some(),
        RecurrenceFrequency::Monthly => req.day_of_month.is_some(),
    };
    if !qualifier_ok {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new(
                "Weekly templates need a weekday; monthly templates need a day of month",
                "VALIDATION_ERROR",
            )),
        ));
    }

    let row = sqlx::query(
        r#"
        INSERT INTO recurring_task
            (organization_id, title, description, assignee_id, frequency, weekday, day_of_month)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, organization_id, title, description, assignee_id,
                  frequency, weekday, day_of_month, active, created_at
        "#,
    )
    .bind(org_id)
    .bind(req.title.trim())
    .bind(&req.description)
    .bind(req.assignee_id)
    .bind(req.frequency.as_str())
    .bind(req.weekday)
    .bind(req.day_of_month)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok((StatusCode::CREATED, Json(recurring_from_row(&row)?)))
}
