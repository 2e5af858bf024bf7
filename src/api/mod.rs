use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::middleware::rate_limit::RateLimiter;
use crate::scheduler::Scheduler;

pub mod admin;
pub mod auth;
pub mod health;
pub mod organization;
pub mod routes;
pub mod tasks;

// ============================================
// Application State
// ============================================

/// Per-process service handles, constructed once in `main` and cloned into
/// every handler. No hidden globals: the limiter and scheduler live here.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub rate_limiter: Arc<RateLimiter>,
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(db: PgPool, config: Config, scheduler: Scheduler) -> Self {
        Self {
            db,
            config: Arc::new(config),
            rate_limiter: Arc::new(RateLimiter::new()),
            scheduler,
        }
    }
}
