use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hiveworks_store::{ProjectStore, RunSummary};
use hiveworks_types::Schedule;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Triggers a `run` command for a project as if a user had issued it. The
/// crawl's own run flow is responsible for recording its terminal outcome
/// on the project row; this trait only reports failures that happen before
/// a crawl task could even start.
#[async_trait]
pub trait RunDispatcher: Send + Sync {
    async fn dispatch_run(&self, project_id: i64) -> Result<(), String>;
}

/// Polls `spider_projects` for due schedules and dispatches a `run` for
/// each, in the teacher's periodic-tick-drives-everything shape, but
/// deciding "is it due now" directly against the structured `Schedule`
/// enum instead of a cron expression (see design notes on why the `cron`
/// crate was dropped).
pub struct Scheduler {
    store: ProjectStore,
    dispatcher: Arc<dyn RunDispatcher>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(store: ProjectStore, dispatcher: Arc<dyn RunDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Runs until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
                _ = sleep(self.tick_interval) => {}
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let projects = match self.store.list_scheduled().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to list scheduled projects");
                return;
            }
        };

        let now = Utc::now();
        for project in projects {
            if project.status == "running" {
                debug!(project_id = project.id, "scheduled run skipped, already running");
                continue;
            }

            let Some(schedule) = project.parsed_schedule() else {
                continue;
            };

            if is_due(&schedule, project.last_run_at, now) {
                self.fire(project.id);
            }
        }
    }

    fn fire(&self, project_id: i64) {
        let dispatcher = self.dispatcher.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            info!(project_id, "scheduler firing run");
            if let Err(e) = dispatcher.dispatch_run(project_id).await {
                warn!(project_id, error = %e, "scheduled run failed to start");
                let summary = RunSummary {
                    status: "error".to_string(),
                    last_run_items: 0,
                    last_run_duration: 0.0,
                    last_error: Some(e),
                };
                if let Err(e2) = store.record_run(project_id, summary).await {
                    warn!(project_id, error = %e2, "failed to record scheduler dispatch failure");
                }
            }
        });
    }
}

/// `Daily`/`Weekly`/`Monthly` fire against the deployment's local wall-clock
/// time; `IntervalMinutes`/`IntervalHours` are elapsed-duration based and
/// timezone-agnostic.
fn is_due(schedule: &Schedule, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match schedule {
        Schedule::IntervalMinutes { interval } => {
            due_after(last_run_at, now, chrono::Duration::minutes(*interval as i64))
        }
        Schedule::IntervalHours { interval } => {
            due_after(last_run_at, now, chrono::Duration::hours(*interval as i64))
        }
        Schedule::Daily { time } => {
            at_or_after_time(time, now) && !already_fired_today(last_run_at, now)
        }
        Schedule::Weekly { time, .. } => {
            let today = now.with_timezone(&Local).weekday();
            let matches_day = schedule.weekdays().iter().any(|d| d.to_chrono() == today);
            matches_day && at_or_after_time(time, now) && !already_fired_today(last_run_at, now)
        }
        Schedule::Monthly { time, dates } => {
            dates.contains(&now.with_timezone(&Local).day())
                && at_or_after_time(time, now)
                && !already_fired_today(last_run_at, now)
        }
    }
}

fn due_after(last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
    match last_run_at {
        None => true,
        Some(last) => now - last >= interval,
    }
}

/// `time` ("HH:MM") is a wall-clock time in the deployment's local zone, so
/// `now` is converted from UTC before comparing against it.
fn at_or_after_time(time: &str, now: DateTime<Utc>) -> bool {
    let Some((hour, minute)) = Schedule::parse_time(time) else {
        return false;
    };
    let local_now = now.with_timezone(&Local);
    match local_now.date_naive().and_hms_opt(hour, minute, 0) {
        Some(scheduled) => local_now.naive_local() >= scheduled,
        None => false,
    }
}

fn already_fired_today(last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_run_at {
        Some(last) => last.with_timezone(&Local).date_naive() == now.with_timezone(&Local).date_naive(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // is_due converts to Local internally; these assume a UTC test
    // environment so the Utc and Local wall clocks line up.
    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn interval_is_due_when_never_run() {
        let schedule = Schedule::IntervalMinutes { interval: 15 };
        assert!(is_due(&schedule, None, at(2026, 1, 1, 0, 0)));
    }

    #[test]
    fn interval_waits_out_its_window() {
        let schedule = Schedule::IntervalMinutes { interval: 15 };
        let last = at(2026, 1, 1, 0, 0);
        assert!(!is_due(&schedule, Some(last), at(2026, 1, 1, 0, 10)));
        assert!(is_due(&schedule, Some(last), at(2026, 1, 1, 0, 15)));
    }

    #[test]
    fn daily_fires_once_past_its_time() {
        let schedule = Schedule::Daily { time: "09:00".to_string() };
        assert!(!is_due(&schedule, None, at(2026, 1, 1, 8, 59)));
        assert!(is_due(&schedule, None, at(2026, 1, 1, 9, 1)));
        // already ran today: not due again even though past the time
        assert!(!is_due(&schedule, Some(at(2026, 1, 1, 9, 1)), at(2026, 1, 1, 12, 0)));
    }

    #[test]
    fn weekly_only_fires_on_listed_days() {
        // 2026-01-01 is a Thursday.
        let schedule = Schedule::Weekly {
            time: "09:00".to_string(),
            days: vec![0, 6], // Sunday, Saturday
        };
        assert!(!is_due(&schedule, None, at(2026, 1, 1, 10, 0)));
        // 2026-01-03 is a Saturday.
        assert!(is_due(&schedule, None, at(2026, 1, 3, 10, 0)));
    }

    #[test]
    fn monthly_only_fires_on_listed_dates() {
        let schedule = Schedule::Monthly {
            time: "09:00".to_string(),
            dates: vec![1, 15],
        };
        assert!(is_due(&schedule, None, at(2026, 1, 1, 10, 0)));
        assert!(!is_due(&schedule, None, at(2026, 1, 2, 10, 0)));
    }
}
