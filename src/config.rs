//! Configuration for the reconciler.
//!
//! Settings are read from `sprintline.toml` and layered:
//! file → environment (`.env` included) → CLI flags.
//! Credentials are never read from or written to the file.
//!
//! # Configuration File Format
//!
//! ```toml
//! [tracker]
//! base_url = "https://example.atlassian.net"
//! board_id = 1
//! project_key = "AX"
//! idea_project_key = "RM"
//!
//! [tracker.fields]
//! story_points = "customfield_10016"
//! sprint = "customfield_10020"
//!
//! [engine]
//! capacity = 40.0
//! window_width = 12
//! sprint_length_days = 14
//! cadence_weekday = "Tue"
//!
//! [alignment]
//! min_confidence = 0.7
//!
//! [retry]
//! max_attempts = 4
//! base_backoff_ms = 500
//!
//! [schedule]
//! interval_secs = 3600
//! weekdays_only = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "sprintline.toml";

/// Tracker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_board_id")]
    pub board_id: u64,
    /// Delivery project holding work items and epics.
    #[serde(default = "default_project_key")]
    pub project_key: String,
    /// Discovery project holding roadmap ideas.
    #[serde(default = "default_idea_project_key")]
    pub idea_project_key: String,
    /// Only pack unscheduled items assigned to this account, when set.
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub fields: FieldIds,
}

fn default_base_url() -> String {
    "https://example.atlassian.net".to_string()
}

fn default_board_id() -> u64 {
    1
}

fn default_project_key() -> String {
    "AX".to_string()
}

fn default_idea_project_key() -> String {
    "RM".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            board_id: default_board_id(),
            project_key: default_project_key(),
            idea_project_key: default_idea_project_key(),
            assignee: None,
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            fields: FieldIds::default(),
        }
    }
}

/// Stable tracker field identifiers, agreed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldIds {
    #[serde(default = "default_story_points_field")]
    pub story_points: String,
    #[serde(default = "default_sprint_field")]
    pub sprint: String,
    #[serde(default = "default_score_field")]
    pub idea_score: String,
    #[serde(default = "default_column_field")]
    pub roadmap_column: String,
    /// Field context whose options are the roadmap columns.
    #[serde(default = "default_column_context")]
    pub roadmap_column_context: String,
    #[serde(default = "default_classification_field")]
    pub classification: String,
    #[serde(default = "default_swimlane_field")]
    pub swimlane: String,
    /// Swimlane option value that marks an idea as secondary (feedback).
    #[serde(default = "default_secondary_value")]
    pub secondary_swimlane_value: String,
    #[serde(default = "default_delivery_link")]
    pub delivery_link_type: String,
    #[serde(default = "default_alignment_link")]
    pub alignment_link_type: String,
}

fn default_story_points_field() -> String {
    "customfield_10016".to_string()
}

fn default_sprint_field() -> String {
    "customfield_10020".to_string()
}

fn default_score_field() -> String {
    "customfield_10150".to_string()
}

fn default_column_field() -> String {
    "customfield_10151".to_string()
}

fn default_column_context() -> String {
    "10300".to_string()
}

fn default_classification_field() -> String {
    "customfield_10152".to_string()
}

fn default_swimlane_field() -> String {
    "customfield_10153".to_string()
}

fn default_secondary_value() -> String {
    "Feedback".to_string()
}

fn default_delivery_link() -> String {
    "Polaris work item link".to_string()
}

fn default_alignment_link() -> String {
    "Relates".to_string()
}

impl Default for FieldIds {
    fn default() -> Self {
        Self {
            story_points: default_story_points_field(),
            sprint: default_sprint_field(),
            idea_score: default_score_field(),
            roadmap_column: default_column_field(),
            roadmap_column_context: default_column_context(),
            classification: default_classification_field(),
            swimlane: default_swimlane_field(),
            secondary_swimlane_value: default_secondary_value(),
            delivery_link_type: default_delivery_link(),
            alignment_link_type: default_alignment_link(),
        }
    }
}

/// Allocation engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Story points a bucket may hold in Backlog/Ready states.
    #[serde(default = "default_capacity")]
    pub capacity: f64,
    /// Number of roadmap columns, active bucket included.
    #[serde(default = "default_window_width")]
    pub window_width: usize,
    #[serde(default = "default_sprint_length_days")]
    pub sprint_length_days: i64,
    /// Weekday new buckets start on.
    #[serde(default = "default_cadence_weekday")]
    pub cadence_weekday: String,
    #[serde(default = "default_pass_limit")]
    pub rebalance_pass_limit: u32,
    #[serde(default = "default_max_ideas_per_column")]
    pub max_ideas_per_column: usize,
    /// Pack Backlog items as well as Ready ones.
    #[serde(default)]
    pub pack_backlog_items: bool,
    /// Close ended buckets and start the next one.
    #[serde(default = "default_true")]
    pub manage_lifecycle: bool,
}

fn default_capacity() -> f64 {
    40.0
}

fn default_window_width() -> usize {
    12
}

fn default_sprint_length_days() -> i64 {
    14
}

fn default_cadence_weekday() -> String {
    "Tue".to_string()
}

fn default_pass_limit() -> u32 {
    8
}

fn default_max_ideas_per_column() -> usize {
    6
}

fn default_true() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_width: default_window_width(),
            sprint_length_days: default_sprint_length_days(),
            cadence_weekday: default_cadence_weekday(),
            rebalance_pass_limit: default_pass_limit(),
            max_ideas_per_column: default_max_ideas_per_column(),
            pack_backlog_items: false,
            manage_lifecycle: true,
        }
    }
}

impl EngineSection {
    /// Cadence weekday, Tuesday when the configured value does not parse.
    pub fn cadence(&self) -> Weekday {
        self.cadence_weekday.parse().unwrap_or(Weekday::Tue)
    }
}

/// Idea placement and promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadmapSection {
    #[serde(default = "default_true")]
    pub promote_ideas: bool,
    #[serde(default = "default_promote_min_score")]
    pub promote_min_score: i32,
    /// Status an idea moves to once it has a delivery epic.
    #[serde(default = "default_delivery_status")]
    pub delivery_status: String,
}

fn default_promote_min_score() -> i32 {
    3
}

fn default_delivery_status() -> String {
    "Delivery".to_string()
}

impl Default for RoadmapSection {
    fn default() -> Self {
        Self {
            promote_ideas: true,
            promote_min_score: default_promote_min_score(),
            delivery_status: default_delivery_status(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

/// Default similarity a match must reach.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

impl Default for AlignmentSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSection {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_generator_timeout_secs() -> u64 {
    60
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generator_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub run_on_start: bool,
    #[serde(default = "default_true")]
    pub weekdays_only: bool,
}

fn default_interval_secs() -> u64 {
    3600
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_start: true,
            weekdays_only: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Also write a daily rolling log file here.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

/// The complete sprintline.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SprintlineToml {
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub roadmap: RoadmapSection,
    #[serde(default)]
    pub alignment: AlignmentSection,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl SprintlineToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse sprintline.toml")
    }

    /// Returns the default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize sprintline.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.capacity <= 0.0 {
            warnings.push(format!(
                "engine.capacity must be positive, got {}",
                self.engine.capacity
            ));
        }
        if self.engine.window_width < 2 {
            warnings.push(format!(
                "engine.window_width must be at least 2 (active + one future bucket), got {}",
                self.engine.window_width
            ));
        }
        if self.engine.sprint_length_days < 1 {
            warnings.push("engine.sprint_length_days must be at least 1".to_string());
        }
        if self.engine.cadence_weekday.parse::<Weekday>().is_err() {
            warnings.push(format!(
                "Invalid engine.cadence_weekday '{}', falling back to Tue",
                self.engine.cadence_weekday
            ));
        }
        if self.engine.rebalance_pass_limit == 0 {
            warnings.push("engine.rebalance_pass_limit of 0 disables rebalancing".to_string());
        }
        if self.engine.max_ideas_per_column == 0 {
            warnings.push("engine.max_ideas_per_column of 0 disables idea placement".to_string());
        }
        if !(0.0..=1.0).contains(&self.alignment.min_confidence) {
            warnings.push(format!(
                "alignment.min_confidence must be within 0.0..=1.0, got {}",
                self.alignment.min_confidence
            ));
        }
        if !(0..=5).contains(&self.roadmap.promote_min_score) {
            warnings.push(format!(
                "roadmap.promote_min_score should be within 0..=5, got {}",
                self.roadmap.promote_min_score
            ));
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts of 0 is treated as 1, so tracker calls are never retried".to_string());
        }
        if self.schedule.interval_secs == 0 {
            warnings.push("schedule.interval_secs must be positive".to_string());
        }

        warnings
    }
}

/// Secrets taken from the environment only.
#[derive(Clone, Default)]
pub struct Credentials {
    pub jira_email: Option<String>,
    pub jira_api_token: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub slack_webhook_url: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(v: &Option<String>) -> &'static str {
            if v.is_some() { "<set>" } else { "<unset>" }
        }
        f.debug_struct("Credentials")
            .field("jira_email", &mask(&self.jira_email))
            .field("jira_api_token", &mask(&self.jira_api_token))
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("slack_webhook_url", &mask(&self.slack_webhook_url))
            .finish()
    }
}

/// Unified configuration: file settings plus environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct SprintlineConfig {
    /// Where the file settings came from, if a file was found.
    pub source: Option<PathBuf>,
    pub toml: SprintlineToml,
    pub credentials: Credentials,
}

impl SprintlineConfig {
    /// Resolve the config file, load it and apply the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        // A missing .env is the normal case.
        let _ = dotenvy::dotenv();
        let source = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover(),
        };
        let toml = match &source {
            Some(path) => SprintlineToml::load_or_default(path)?,
            None => SprintlineToml::default(),
        };
        let mut config = Self {
            source,
            toml,
            credentials: Credentials::default(),
        };
        config.apply_env_with(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// `./sprintline.toml` first, then the user config directory.
    pub fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("sprintline").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn from_toml(toml: SprintlineToml) -> Self {
        Self {
            source: None,
            toml,
            credentials: Credentials::default(),
        }
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("JIRA_BASE_URL") {
            self.toml.tracker.base_url = url;
        }
        if let Some(board) = lookup("JIRA_BOARD_ID").and_then(|v| v.parse().ok()) {
            self.toml.tracker.board_id = board;
        }
        if let Some(assignee) = lookup("JIRA_ASSIGNEE_ID") {
            self.toml.tracker.assignee = Some(assignee);
        }
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        self.credentials = Credentials {
            jira_email: non_empty("JIRA_EMAIL"),
            jira_api_token: non_empty("JIRA_API_TOKEN"),
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            slack_webhook_url: non_empty("SLACK_WEBHOOK_URL"),
        };
    }

    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.tracker.timeout_secs)
    }

    /// File warnings plus warnings about missing credentials.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.credentials.jira_email.is_none() || self.credentials.jira_api_token.is_none() {
            warnings.push(
                "JIRA_EMAIL / JIRA_API_TOKEN not set: tracker calls will be rejected".to_string(),
            );
        }
        if self.credentials.anthropic_api_key.is_none() {
            warnings.push("ANTHROPIC_API_KEY not set: alignment stage will be skipped".to_string());
        }
        if self.credentials.slack_webhook_url.is_none() {
            warnings.push("SLACK_WEBHOOK_URL not set: notifications go to the log only".to_string());
        }
        warnings
    }
}
