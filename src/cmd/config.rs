//! Configuration view and validation commands: `sprintline config`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use sprintline::config::{CONFIG_FILE_NAME, SprintlineConfig, SprintlineToml};

use super::super::ConfigCommands;

fn print_effective(toml: &SprintlineToml) {
    println!("[tracker]");
    println!("  base_url = \"{}\"", toml.tracker.base_url);
    println!("  board_id = {}", toml.tracker.board_id);
    println!("  project_key = \"{}\"", toml.tracker.project_key);
    println!("  idea_project_key = \"{}\"", toml.tracker.idea_project_key);
    if let Some(assignee) = &toml.tracker.assignee {
        println!("  assignee = \"{}\"", assignee);
    }
    println!();

    println!("[engine]");
    println!("  capacity = {}", toml.engine.capacity);
    println!("  window_width = {}", toml.engine.window_width);
    println!("  sprint_length_days = {}", toml.engine.sprint_length_days);
    println!("  cadence_weekday = \"{}\"", toml.engine.cadence_weekday);
    println!("  rebalance_pass_limit = {}", toml.engine.rebalance_pass_limit);
    println!("  max_ideas_per_column = {}", toml.engine.max_ideas_per_column);
    println!("  pack_backlog_items = {}", toml.engine.pack_backlog_items);
    println!("  manage_lifecycle = {}", toml.engine.manage_lifecycle);
    println!();

    println!("[roadmap]");
    println!("  promote_ideas = {}", toml.roadmap.promote_ideas);
    println!("  promote_min_score = {}", toml.roadmap.promote_min_score);
    println!("  delivery_status = \"{}\"", toml.roadmap.delivery_status);
    println!();

    println!("[alignment]");
    println!("  enabled = {}", toml.alignment.enabled);
    println!("  min_confidence = {}", toml.alignment.min_confidence);
    println!();

    println!("[schedule]");
    println!("  interval_secs = {}", toml.schedule.interval_secs);
    println!("  run_on_start = {}", toml.schedule.run_on_start);
    println!("  weekdays_only = {}", toml.schedule.weekdays_only);
    println!();
}

pub fn cmd_config(explicit: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let found = explicit
        .map(Path::to_path_buf)
        .or_else(SprintlineConfig::discover);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Sprintline Configuration");
            println!("========================");
            println!();

            let config = SprintlineConfig::load(explicit)?;
            match &config.source {
                Some(path) if path.exists() => println!("Config file: {}", path.display()),
                Some(path) => println!("No config file at {}, using defaults", path.display()),
                None => println!("No {} found, using defaults", CONFIG_FILE_NAME),
            }
            println!("Credentials: {:?}", config.credentials);
            println!();
            println!("Effective values (with env overrides):");
            println!();
            print_effective(&config.toml);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if found.as_ref().is_none_or(|path| !path.exists()) {
                println!("No {} found. Checking defaults.", CONFIG_FILE_NAME);
            }
            let config = SprintlineConfig::load(explicit)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init { force }) => {
            let path = explicit
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            if path.exists() && !force {
                println!("{} already exists at {}", CONFIG_FILE_NAME, path.display());
                println!("Pass --force to overwrite it.");
                return Ok(());
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }

            SprintlineToml::default().save(&path)?;

            println!("Created {} at {}", CONFIG_FILE_NAME, path.display());
            println!();
            println!("You can now customize:");
            println!("  - [tracker] base_url, board_id, project keys and field ids");
            println!("  - [engine] capacity, window_width, cadence_weekday");
            println!("  - [schedule] interval_secs, weekdays_only");
            println!();
            println!("Credentials are read from JIRA_EMAIL, JIRA_API_TOKEN,");
            println!("ANTHROPIC_API_KEY and SLACK_WEBHOOK_URL.");
            println!();
        }
    }

    Ok(())
}
