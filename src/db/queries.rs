// Queries shared between the scheduler jobs and the token lifecycle.
// Request handlers keep their one-off queries inline.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::task::{RecurrenceFrequency, TaskStatus};
use crate::models::token::AuthToken;

// ============================================
// Token Store
// ============================================

/// Issue a token record. The caller supplies the SHA-256 digest of the raw
/// bearer string; the raw token never reaches the database.
pub async fn insert_token(
    pool: &PgPool,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<AuthToken, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO auth_token (user_id, token_hash, expires_at)
        VALUES ($1, $2, $3)
        RETURNING id, user_id, token_hash, expires_at, revoked, created_at
        "#,
    )
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    Ok(AuthToken {
        id: row.get("id"),
        user_id: row.get("user_id"),
        token_hash: row.get("token_hash"),
        expires_at: row.get("expires_at"),
        revoked: row.get("revoked"),
        created_at: row.get("created_at"),
    })
}

pub async fn revoke_token(pool: &PgPool, token_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE auth_token SET revoked = TRUE WHERE id = $1")
        .bind(token_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete every expired or revoked token row. Returns the count removed.
pub async fn delete_expired_tokens(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM auth_token WHERE expires_at <= NOW() OR revoked = TRUE")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ============================================
// Recurring Tasks
// ============================================

#[derive(Debug)]
pub struct DueTemplate {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
}

/// Active templates due today in operational organizations, excluding any
/// that already produced an instance today (idempotent re-runs).
/// `weekday` is Mon=0; `day_of_month` is 1-based.
pub async fn due_recurring_templates(
    pool: &PgPool,
    weekday: i16,
    day_of_month: i16,
) -> Result<Vec<DueTemplate>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT rt.id, rt.organization_id, rt.title, rt.description, rt.assignee_id
        FROM recurring_task rt
        JOIN organization o ON rt.organization_id = o.id
        WHERE rt.active = TRUE
          AND o.status IN ('active', 'trial')
          AND (
                rt.frequency = $3
             OR (rt.frequency = $4 AND rt.weekday = $1)
             OR (rt.frequency = $5 AND rt.day_of_month = $2)
          )
          AND NOT EXISTS (
                SELECT 1 FROM task t
                WHERE t.recurring_task_id = rt.id
                  AND t.created_at::date = CURRENT_DATE
          )
        "#,
    )
    .bind(weekday)
    .bind(day_of_month)
    .bind(RecurrenceFrequency::Daily.as_str())
    .bind(RecurrenceFrequency::Weekly.as_str())
    .bind(RecurrenceFrequency::Monthly.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| DueTemplate {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            title: row.get("title"),
            description: row.get("description"),
            assignee_id: row.get("assignee_id"),
        })
        .collect())
}

/// Materialize one task instance from a template, due at end of day.
pub async fn create_task_from_template(
    pool: &PgPool,
    template: &DueTemplate,
    date: NaiveDate,
) -> Result<(), sqlx::Error> {
    let due = date
        .and_hms_opt(23, 59, 59)
        .expect("end of day is a valid wall-clock time")
        .and_utc();
    let status = if template.assignee_id.is_some() {
        TaskStatus::Assigned
    } else {
        TaskStatus::Pending
    };

    sqlx::query(
        r#"
        INSERT INTO task
            (organization_id, title, description, assignee_id, status, due_date, recurring_task_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(template.organization_id)
    .bind(&template.title)
    .bind(&template.description)
    .bind(template.assignee_id)
    .bind(status.as_str())
    .bind(due)
    .bind(template.id)
    .execute(pool)
    .await?;

    Ok(())
}

// ============================================
// Overdue Scan
// ============================================

#[derive(Debug)]
pub struct OverdueTask {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub status: String,
    pub due_date: DateTime<Utc>,
}

/// Open tasks whose due date has passed.
pub async fn overdue_tasks(pool: &PgPool) -> Result<Vec<OverdueTask>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, organization_id, title, status, due_date
        FROM task
        WHERE due_date < NOW()
          AND status IN ('pending', 'assigned', 'in_progress')
        ORDER BY due_date
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| OverdueTask {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            title: row.get("title"),
            status: row.get("status"),
            due_date: row.get("due_date"),
        })
        .collect())
}

// ============================================
// Retention & Stats
// ============================================

pub async fn delete_old_activity_logs(
    pool: &PgPool,
    retention_days: i64,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM activity_log WHERE created_at < NOW() - make_interval(days => $1::int)")
            .bind(retention_days)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

/// Upsert cached counters for every organization in one statement.
/// Returns the number of organizations refreshed.
pub async fn refresh_organization_stats(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO org_stats (organization_id, open_tasks, completed_tasks, active_users, computed_at)
        SELECT
            o.id,
            COUNT(t.id) FILTER (WHERE t.status IN ('pending', 'assigned', 'in_progress')),
            COUNT(t.id) FILTER (WHERE t.status = 'completed'),
            (SELECT COUNT(*) FROM app_user u
              WHERE u.organization_id = o.id AND u.status = 'active'),
            NOW()
        FROM organization o
        LEFT JOIN task t ON t.organization_id = o.id
        GROUP BY o.id
        ON CONFLICT (organization_id) DO UPDATE SET
            open_tasks = EXCLUDED.open_tasks,
            completed_tasks = EXCLUDED.completed_tasks,
            active_users = EXCLUDED.active_users,
            computed_at = EXCLUDED.computed_at
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// ============================================
// Activity Log
// ============================================

/// Append an audit row. Best-effort at call sites; failures are logged and
/// never fail the request.
pub async fn record_activity(
    pool: &PgPool,
    organization_id: Option<Uuid>,
    user_id: Option<Uuid>,
    action: &str,
    detail: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO activity_log (organization_id, user_id, action, detail)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(organization_id)
    .bind(user_id)
    .bind(action)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(())
}
