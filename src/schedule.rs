//! Fixed-interval trigger loop.
//!
//! Ticks every `schedule.interval_secs` and hands the runner one cycle per
//! tick. A tick that lands while a cycle is still running is dropped by the
//! runner's guard, and missed ticks are skipped rather than bunched up.
//! Ctrl-C stops the loop once the in-flight cycle has finished.

use std::future::Future;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate, Weekday};
use tokio::time::MissedTickBehavior;

use crate::config::ScheduleSection;
use crate::cycle::CycleRunner;

#[derive(Debug, Clone)]
pub struct Schedule {
    pub interval: Duration,
    pub run_on_start: bool,
    pub weekdays_only: bool,
}

impl From<&ScheduleSection> for Schedule {
    fn from(section: &ScheduleSection) -> Self {
        Self {
            interval: Duration::from_secs(section.interval_secs.max(1)),
            run_on_start: section.run_on_start,
            weekdays_only: section.weekdays_only,
        }
    }
}

impl Schedule {
    pub fn should_run(&self, date: NaiveDate) -> bool {
        !self.weekdays_only || !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// Run cycles until `shutdown` resolves. Returns the number of cycles run.
pub async fn run_until<F>(runner: &CycleRunner, schedule: &Schedule, shutdown: F) -> usize
where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    if !schedule.run_on_start {
        // The first tick completes immediately.
        ticker.tick().await;
    }
    tokio::pin!(shutdown);

    let mut cycles = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(cycles, "Shutdown requested, scheduler stopping");
                break;
            }
            _ = ticker.tick() => {
                let today = Local::now().date_naive();
                if !schedule.should_run(today) {
                    tracing::debug!(%today, "Weekend, cycle skipped");
                    continue;
                }
                if let Some(summary) = runner.trigger(today).await {
                    cycles += 1;
                    match serde_json::to_string(&summary) {
                        Ok(json) => tracing::info!(summary = %json, "Cycle summary"),
                        Err(e) => tracing::warn!(error = %e, "Could not serialize cycle summary"),
                    }
                }
            }
        }
    }
    cycles
}

/// Resolves on Ctrl-C. A failed handler install never resolves.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

pub async fn run_until_shutdown(runner: &CycleRunner, schedule: &Schedule) -> usize {
    tracing::info!(interval_secs = schedule.interval.as_secs(), "Scheduler started");
    run_until(runner, schedule, shutdown_signal()).await
}
