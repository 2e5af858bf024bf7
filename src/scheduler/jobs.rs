// Scheduled job bodies. Each returns a one-line summary for the scheduler
// log on success; errors bubble up to the loop where they are contained.

use anyhow::Context;
use chrono::{Datelike, Utc};
use sqlx::PgPool;

use crate::db::queries;

/// Hourly sweep of the token store: expired and revoked rows are deleted.
pub async fn cleanup_expired_tokens(pool: &PgPool) -> anyhow::Result<String> {
    let removed = queries::delete_expired_tokens(pool)
        .await
        .context("token cleanup sweep failed")?;
    Ok(format!("Removed {} expired or revoked tokens", removed))
}

/// Daily 06:00 pass: instantiate today's occurrences of every active
/// recurring template in operational organizations. Templates that already
/// produced an instance today are skipped, so the job is safe to re-run.
pub async fn create_daily_tasks(pool: &PgPool) -> anyhow::Result<String> {
    let today = Utc::now().date_naive();
    let weekday = today.weekday().num_days_from_monday() as i16;
    let day_of_month = today.day() as i16;

    let templates = queries::due_recurring_templates(pool, weekday, day_of_month)
        .await
        .context("loading due recurring templates failed")?;

    let mut created = 0u32;
    for template in &templates {
        match queries::create_task_from_template(pool, template, today).await {
            Ok(()) => created += 1,
            Err(e) => {
                // One bad template must not block the rest of the batch.
                tracing::error!(
                    template_id = %template.id,
                    organization_id = %template.organization_id,
                    "Failed to instantiate recurring task: {}",
                    e
                );
            }
        }
    }

    Ok(format!(
        "Created {} of {} due recurring tasks",
        created,
        templates.len()
    ))
}

/// Weekly retention pass over the activity log.
pub async fn cleanup_old_data(pool: &PgPool, retention_days: i64) -> anyhow::Result<String> {
    let removed = queries::delete_old_activity_logs(pool, retention_days)
        .await
        .context("activity log purge failed")?;
    Ok(format!(
        "Purged {} activity log rows older than {} days",
        removed, retention_days
    ))
}

/// Scan for overdue open tasks and warn-log each one. Deliberately
/// observation-only: no status changes, no notifications.
pub async fn check_overdue_tasks(pool: &PgPool) -> anyhow::Result<String> {
    let overdue = queries::overdue_tasks(pool)
        .await
        .context("overdue task scan failed")?;

    for task in &overdue {
        tracing::warn!(
            task_id = %task.id,
            organization_id = %task.organization_id,
            status = %task.status,
            due_date = %task.due_date,
            "Task overdue: {}",
            task.title
        );
    }

    Ok(format!("{} overdue tasks found", overdue.len()))
}

/// Refresh cached per-organization counters. Currently a thin set of
/// aggregates; heavier report material hangs off the same hook.
pub async fn update_statistics(pool: &PgPool) -> anyhow::Result<String> {
    let refreshed = queries::refresh_organization_stats(pool)
        .await
        .context("statistics refresh failed")?;
    Ok(format!("Refreshed stats for {} organizations", refreshed))
}
