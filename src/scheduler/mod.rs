// ============================================
// Background Job Scheduler
// ============================================
//
// In-process periodic maintenance without an external job queue. A single
// tokio task wakes on a coarse polling interval, runs every job whose
// trigger has elapsed, and goes back to sleep. Jobs run sequentially; a
// slow job delays the ones behind it by design, so job bodies must
// tolerate bounded drift (up to one polling interval).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::PgPool;
use tokio::task::JoinHandle;

pub mod jobs;

/// How often the loop wakes to look for due jobs. Coarse on purpose: the
/// finest trigger in the fixed table is 30 minutes.
const POLL_INTERVAL: Duration = Duration::from_secs(60);

// ============================================
// Triggers
// ============================================

/// When a job fires: a fixed interval, or a wall-clock time of day (UTC).
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    Interval(Duration),
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
}

fn at_wall_clock(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    date.and_hms_opt(hour.min(23), minute.min(59), 0)
        .expect("clamped wall-clock time is always valid")
        .and_utc()
}

impl Trigger {
    /// The first instant strictly after `after` at which this trigger fires.
    pub fn next_run(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Trigger::Interval(d) => {
                let step = ChronoDuration::from_std(*d)
                    .unwrap_or_else(|_| ChronoDuration::seconds(POLL_INTERVAL.as_secs() as i64));
                after + step
            }
            Trigger::Daily { hour, minute } => {
                let today = at_wall_clock(after.date_naive(), *hour, *minute);
                if today > after {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
            Trigger::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let days_ahead = (weekday.num_days_from_monday() + 7
                    - after.weekday().num_days_from_monday())
                    % 7;
                let candidate = at_wall_clock(
                    after.date_naive() + ChronoDuration::days(days_ahead as i64),
                    *hour,
                    *minute,
                );
                if candidate > after {
                    candidate
                } else {
                    candidate + ChronoDuration::days(7)
                }
            }
        }
    }
}

// ============================================
// Jobs
// ============================================

/// A job body: owns its captures, reports a human-readable summary on
/// success. Errors are contained by the loop and logged, never propagated.
pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

struct ScheduledJob {
    name: String,
    trigger: Trigger,
    action: JobAction,
    last_run: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
}

/// Outcome of a manual `execute_now` invocation.
#[derive(Debug, Serialize)]
pub struct JobRunOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub thread_alive: bool,
    pub job_count: usize,
    pub next_run: Option<DateTime<Utc>>,
}

// ============================================
// Scheduler
// ============================================

struct SchedulerInner {
    jobs: Mutex<Vec<ScheduledJob>>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: tokio::sync::Notify,
}

/// Clone-friendly handle over the single per-process scheduler instance.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                handle: Mutex::new(None),
                shutdown: tokio::sync::Notify::new(),
            }),
        }
    }

    /// Build a scheduler with the fixed maintenance job table.
    pub fn with_default_jobs(pool: PgPool, log_retention_days: i64) -> Self {
        let scheduler = Self::new();

        let p = pool.clone();
        scheduler.register(
            "cleanup_tokens",
            Trigger::Interval(Duration::from_secs(3600)),
            Arc::new(move || {
                let pool = p.clone();
                Box::pin(async move { jobs::cleanup_expired_tokens(&pool).await })
            }),
        );

        let p = pool.clone();
        scheduler.register(
            "create_daily_tasks",
            Trigger::Daily { hour: 6, minute: 0 },
            Arc::new(move || {
                let pool = p.clone();
                Box::pin(async move { jobs::create_daily_tasks(&pool).await })
            }),
        );

        let p = pool.clone();
        scheduler.register(
            "cleanup_logs",
            Trigger::Weekly {
                weekday: Weekday::Sun,
                hour: 2,
                minute: 0,
            },
            Arc::new(move || {
                let pool = p.clone();
                Box::pin(async move { jobs::cleanup_old_data(&pool, log_retention_days).await })
            }),
        );

        let p = pool.clone();
        scheduler.register(
            "check_overdue",
            Trigger::Interval(Duration::from_secs(30 * 60)),
            Arc::new(move || {
                let pool = p.clone();
                Box::pin(async move { jobs::check_overdue_tasks(&pool).await })
            }),
        );

        let p = pool;
        scheduler.register(
            "update_stats",
            Trigger::Interval(Duration::from_secs(6 * 3600)),
            Arc::new(move || {
                let pool = p.clone();
                Box::pin(async move { jobs::update_statistics(&pool).await })
            }),
        );

        scheduler
    }

    /// Register a job. The first run is one full trigger period from now.
    pub fn register(&self, name: &str, trigger: Trigger, action: JobAction) {
        let mut jobs = self.inner.jobs.lock().unwrap();
        jobs.push(ScheduledJob {
            name: name.to_string(),
            trigger,
            action,
            last_run: None,
            next_run: trigger.next_run(Utc::now()),
        });
    }

    /// Launch the background loop. Idempotent: a second call while running
    /// is a logged no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Scheduler start() called while already running; ignoring");
            return;
        }

        // Rebaseline so a stop/start cycle does not fire everything at once.
        {
            let now = Utc::now();
            let mut jobs = self.inner.jobs.lock().unwrap();
            for job in jobs.iter_mut() {
                job.next_run = job.trigger.next_run(now);
            }
            tracing::info!(
                "Scheduler started ({} jobs, poll interval {}s)",
                jobs.len(),
                POLL_INTERVAL.as_secs()
            );
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                run_due(&inner, Utc::now()).await;

                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = inner.shutdown.notified() => {}
                }
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
            }
            tracing::info!("Scheduler loop exited");
        });

        *self.inner.handle.lock().unwrap() = Some(handle);
    }

    /// Cooperative stop: the loop observes the flag on its next wake.
    /// An in-flight job run is allowed to finish.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("Scheduler stop() called while not running; ignoring");
            return;
        }
        self.inner.shutdown.notify_one();
        tracing::info!("Scheduler stop requested");
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self.inner.jobs.lock().unwrap();
        let next_run = jobs.iter().map(|j| j.next_run).min();
        let thread_alive = self
            .inner
            .handle
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|h| !h.is_finished());

        SchedulerStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            thread_alive,
            job_count: jobs.len(),
            next_run,
        }
    }

    /// Run a job once, immediately, off-schedule. The regular cadence is
    /// untouched. An unknown name is an error result, not a panic.
    pub async fn execute_now(&self, job_name: &str) -> JobRunOutcome {
        let action = {
            let jobs = self.inner.jobs.lock().unwrap();
            jobs.iter()
                .find(|j| j.name == job_name)
                .map(|j| j.action.clone())
        };

        let action = match action {
            Some(a) => a,
            None => {
                return JobRunOutcome {
                    success: false,
                    message: None,
                    error: Some(format!("Unknown job: {}", job_name)),
                };
            }
        };

        tracing::info!(job = %job_name, "Manual job execution requested");
        match action().await {
            Ok(message) => JobRunOutcome {
                success: true,
                message: Some(message),
                error: None,
            },
            Err(e) => JobRunOutcome {
                success: false,
                message: None,
                error: Some(format!("{:#}", e)),
            },
        }
    }

    #[cfg(test)]
    async fn run_due_at(&self, now: DateTime<Utc>) {
        run_due(&self.inner, now).await;
    }

    #[cfg(test)]
    fn set_next_run(&self, job_name: &str, at: DateTime<Utc>) {
        let mut jobs = self.inner.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.name == job_name) {
            job.next_run = at;
        }
    }

    #[cfg(test)]
    fn last_run_of(&self, job_name: &str) -> Option<DateTime<Utc>> {
        let jobs = self.inner.jobs.lock().unwrap();
        jobs.iter()
            .find(|j| j.name == job_name)
            .and_then(|j| j.last_run)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// One scheduling pass: run every due job sequentially, then recompute its
/// next occurrence. A failing job is logged and contained; the jobs behind
/// it still run in the same pass.
async fn run_due(inner: &SchedulerInner, now: DateTime<Utc>) {
    // Snapshot due actions first; the lock is never held across an await.
    let due: Vec<(String, JobAction)> = {
        let jobs = inner.jobs.lock().unwrap();
        jobs.iter()
            .filter(|j| j.next_run <= now)
            .map(|j| (j.name.clone(), j.action.clone()))
            .collect()
    };

    for (name, action) in due {
        let started = Utc::now();
        match action().await {
            Ok(message) => {
                tracing::info!(job = %name, "Job completed: {}", message);
            }
            Err(e) => {
                tracing::error!(job = %name, "Job failed: {:#}", e);
            }
        }

        let mut jobs = inner.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.name == name) {
            job.last_run = Some(started);
            job.next_run = job.trigger.next_run(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicU32;

    fn counting_action(counter: Arc<AtomicU32>) -> JobAction {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("ran".to_string())
            })
        })
    }

    fn failing_action() -> JobAction {
        Arc::new(|| Box::pin(async { Err(anyhow::anyhow!("collaborator unavailable")) }))
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    // ---- trigger arithmetic ----

    #[test]
    fn interval_trigger_advances_by_period() {
        let t = Trigger::Interval(Duration::from_secs(3600));
        let after = utc(2026, 3, 2, 10, 15);
        assert_eq!(t.next_run(after), utc(2026, 3, 2, 11, 15));
    }

    #[test]
    fn daily_trigger_fires_today_or_tomorrow() {
        let t = Trigger::Daily { hour: 6, minute: 0 };
        assert_eq!(t.next_run(utc(2026, 3, 2, 4, 0)), utc(2026, 3, 2, 6, 0));
        assert_eq!(t.next_run(utc(2026, 3, 2, 6, 0)), utc(2026, 3, 3, 6, 0));
        assert_eq!(t.next_run(utc(2026, 3, 2, 23, 59)), utc(2026, 3, 3, 6, 0));
    }

    #[test]
    fn weekly_trigger_wraps_to_next_week() {
        let t = Trigger::Weekly {
            weekday: Weekday::Sun,
            hour: 2,
            minute: 0,
        };
        // 2026-03-02 is a Monday; next Sunday 02:00 is 2026-03-08.
        assert_eq!(t.next_run(utc(2026, 3, 2, 10, 0)), utc(2026, 3, 8, 2, 0));
        // Exactly at the trigger instant, the next run is a week out.
        assert_eq!(t.next_run(utc(2026, 3, 8, 2, 0)), utc(2026, 3, 15, 2, 0));
        // Later the same Sunday also wraps.
        assert_eq!(t.next_run(utc(2026, 3, 8, 3, 0)), utc(2026, 3, 15, 2, 0));
    }

    // ---- scheduling passes ----

    #[tokio::test]
    async fn only_due_jobs_fire() {
        let scheduler = Scheduler::new();
        let hourly = Arc::new(AtomicU32::new(0));
        let half_hourly = Arc::new(AtomicU32::new(0));

        scheduler.register(
            "hourly",
            Trigger::Interval(Duration::from_secs(3600)),
            counting_action(hourly.clone()),
        );
        scheduler.register(
            "half_hourly",
            Trigger::Interval(Duration::from_secs(1800)),
            counting_action(half_hourly.clone()),
        );

        let base = utc(2026, 3, 2, 12, 0);
        scheduler.set_next_run("hourly", base + ChronoDuration::hours(1));
        scheduler.set_next_run("half_hourly", base + ChronoDuration::minutes(30));

        // 45 minutes in: only the half-hourly job is due.
        scheduler.run_due_at(base + ChronoDuration::minutes(45)).await;
        assert_eq!(hourly.load(Ordering::SeqCst), 0);
        assert_eq!(half_hourly.load(Ordering::SeqCst), 1);

        // At the one-hour mark only the hourly job is due (the half-hourly
        // one was pushed to base+75m by its last run).
        scheduler.run_due_at(base + ChronoDuration::hours(1)).await;
        assert_eq!(hourly.load(Ordering::SeqCst), 1);
        assert_eq!(half_hourly.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn job_runs_once_per_due_pass() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.register(
            "hourly",
            Trigger::Interval(Duration::from_secs(3600)),
            counting_action(counter.clone()),
        );

        let base = utc(2026, 3, 2, 12, 0);
        scheduler.set_next_run("hourly", base);
        scheduler.run_due_at(base).await;
        scheduler.run_due_at(base + ChronoDuration::minutes(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(scheduler.last_run_of("hourly").is_some());
    }

    #[tokio::test]
    async fn failing_job_does_not_suppress_later_jobs() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));

        scheduler.register(
            "broken",
            Trigger::Interval(Duration::from_secs(60)),
            failing_action(),
        );
        scheduler.register(
            "healthy",
            Trigger::Interval(Duration::from_secs(60)),
            counting_action(counter.clone()),
        );

        let base = utc(2026, 3, 2, 12, 0);
        scheduler.set_next_run("broken", base);
        scheduler.set_next_run("healthy", base);
        scheduler.run_due_at(base).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The broken job still gets its next occurrence.
        scheduler.run_due_at(base + ChronoDuration::minutes(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(scheduler.last_run_of("broken").is_some());
    }

    // ---- lifecycle ----

    #[tokio::test]
    async fn start_is_idempotent() {
        let scheduler = Scheduler::new();
        scheduler.start();
        scheduler.start();

        let status = scheduler.status();
        assert!(status.running);
        assert!(status.thread_alive);

        scheduler.stop();
        // Give the loop a chance to observe the flag.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = scheduler.status();
        assert!(!status.running);
        assert!(!status.thread_alive);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let scheduler = Scheduler::new();
        scheduler.stop();
        assert!(!scheduler.status().running);
    }

    #[tokio::test]
    async fn status_reports_earliest_next_run() {
        let scheduler = Scheduler::new();
        let c = Arc::new(AtomicU32::new(0));
        scheduler.register(
            "a",
            Trigger::Interval(Duration::from_secs(3600)),
            counting_action(c.clone()),
        );
        scheduler.register(
            "b",
            Trigger::Interval(Duration::from_secs(60)),
            counting_action(c.clone()),
        );

        let early = utc(2026, 3, 2, 12, 0);
        let late = utc(2026, 3, 2, 18, 0);
        scheduler.set_next_run("a", late);
        scheduler.set_next_run("b", early);

        let status = scheduler.status();
        assert_eq!(status.job_count, 2);
        assert_eq!(status.next_run, Some(early));
    }

    // ---- manual execution ----

    #[tokio::test]
    async fn execute_now_runs_exactly_once_and_reports_success() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.register(
            "cleanup_tokens",
            Trigger::Interval(Duration::from_secs(3600)),
            counting_action(counter.clone()),
        );

        let before = scheduler.status().next_run;
        let outcome = scheduler.execute_now("cleanup_tokens").await;
        assert!(outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("ran"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // The schedule is untouched by a manual run.
        assert_eq!(scheduler.status().next_run, before);
    }

    #[tokio::test]
    async fn execute_now_surfaces_job_errors() {
        let scheduler = Scheduler::new();
        scheduler.register(
            "broken",
            Trigger::Interval(Duration::from_secs(60)),
            failing_action(),
        );

        let outcome = scheduler.execute_now("broken").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("collaborator unavailable"));
    }

    #[tokio::test]
    async fn execute_now_unknown_name_is_nonfatal() {
        let scheduler = Scheduler::new();
        let outcome = scheduler.execute_now("no_such_job").await;
        assert!(!outcome.success);
        assert!(!outcome.error.unwrap().is_empty());
    }
}
