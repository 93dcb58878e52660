//! Cycle commands: `sprintline run`, `cycle` and `simulate`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde_json::json;

use sprintline::config::SprintlineConfig;
use sprintline::cycle::{CycleRunner, CycleSettings};
use sprintline::generator::{self, UnavailableGenerator};
use sprintline::notify::{self, LogNotifier};
use sprintline::schedule::{self, Schedule};
use sprintline::tracker::{InMemoryTracker, JiraTracker, RetryPolicy};

fn live_runner(config: &SprintlineConfig) -> Result<CycleRunner> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    let tracker = JiraTracker::from_config(config).context("Failed to build Jira client")?;
    Ok(CycleRunner::new(
        Arc::new(tracker),
        generator::from_config(config),
        notify::from_config(config),
        CycleSettings::from(&config.toml),
    )
    .with_retry(RetryPolicy::from(&config.toml.retry)))
}

pub async fn cmd_run(config: &SprintlineConfig) -> Result<()> {
    let runner = live_runner(config)?;
    let schedule = Schedule::from(&config.toml.schedule);
    let cycles = schedule::run_until_shutdown(&runner, &schedule).await;
    println!("Stopped after {} cycle(s).", cycles);
    Ok(())
}

pub async fn cmd_cycle(config: &SprintlineConfig, date: Option<NaiveDate>) -> Result<()> {
    let runner = live_runner(config)?;
    let today = date.unwrap_or_else(|| Local::now().date_naive());
    let Some(summary) = runner.trigger(today).await else {
        anyhow::bail!("A cycle is already running");
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Run cycles against a board fixture and print what they did.
///
/// The generator is always unavailable here, so alignment never runs.
pub async fn cmd_simulate(
    config: &SprintlineConfig,
    fixture: &Path,
    cycles: usize,
    date: Option<NaiveDate>,
) -> Result<()> {
    let content = std::fs::read_to_string(fixture)
        .with_context(|| format!("Failed to read fixture: {}", fixture.display()))?;
    let tracker = Arc::new(
        InMemoryTracker::from_json(&content)
            .with_context(|| format!("Invalid board fixture: {}", fixture.display()))?,
    );
    let runner = CycleRunner::new(
        tracker.clone(),
        Arc::new(UnavailableGenerator::new("simulation")),
        Arc::new(LogNotifier),
        CycleSettings::from(&config.toml),
    )
    .with_retry(RetryPolicy::immediate(1));

    let today = date.unwrap_or_else(|| Local::now().date_naive());
    let mut summaries = Vec::with_capacity(cycles);
    for _ in 0..cycles {
        if let Some(summary) = runner.trigger(today).await {
            summaries.push(summary);
        }
    }

    let report = json!({
        "cycles": summaries,
        "mutations": tracker.mutations(),
        "board": tracker.snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
