use axum::{
    Router,
    routing::{get, post, put},
};

use super::AppState;
use super::{admin, auth, organization, tasks};

/// V1 API routes
///
/// ## Public Routes (rate-limited, no auth)
/// - POST /auth/register - Bootstrap an organization and its admin account
/// - POST /auth/login - Exchange credentials for a bearer token
///
/// ## Authenticated (any active principal)
/// - POST /auth/refresh - Rotate the current token
/// - POST /auth/logout - Revoke the current token
/// - GET  /auth/me - Current account profile
///
/// ## Organization (role-gated)
/// - GET  /organization - Current organization
/// - PUT  /organization - Update organization details (admin)
///
/// ## Tasks (scope-gated)
/// - GET  /tasks - List organization tasks
/// - POST /tasks - Create a task
/// - POST /tasks/{task_id}/complete - Mark a task completed
/// - GET  /tasks/recurring - List recurring templates
/// - POST /tasks/recurring - Create a recurring template
///
/// ## Scheduler Control (admin)
/// - GET  /admin/scheduler - Background scheduler status
/// - POST /admin/scheduler/jobs/{job_name}/run - Run a job immediately
pub fn v1_routes() -> Router<AppState> {
    Router::new()
        // ========================================
        // Public: account bootstrap + login
        // ========================================
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        // ========================================
        // Token lifecycle + profile
        // ========================================
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        // ========================================
        // Organization
        // ========================================
        .route("/organization", get(organization::get_current_organization))
        .route("/organization", put(organization::update_organization))
        // ========================================
        // Tasks
        // ========================================
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks", post(tasks::create_task))
        .route("/tasks/recurring", get(tasks::list_recurring_tasks))
        .route("/tasks/recurring", post(tasks::create_recurring_task))
        .route("/tasks/{task_id}/complete", post(tasks::complete_task))
        // ========================================
        // Scheduler control surface
        // ========================================
        .route("/admin/scheduler", get(admin::scheduler_status))
        .route(
            "/admin/scheduler/jobs/{job_name}/run",
            post(admin::run_scheduler_job),
        )
}
