use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::ItemKey;

/// Roadmap swimlane. Primary ideas are initiatives; secondary ideas are
/// feedback that gets aligned onto an initiative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Swimlane {
    #[default]
    Primary,
    Secondary,
}

/// A roadmap entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub key: ItemKey,
    #[serde(default)]
    pub summary: String,
    /// 0..=5, `None` when unscored.
    #[serde(default)]
    pub score: Option<i32>,
    #[serde(default)]
    pub swimlane: Swimlane,
    #[serde(default)]
    pub classification: Option<String>,
    /// Label of the roadmap column the idea sits in.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub delivery_epic: Option<ItemKey>,
    #[serde(default)]
    pub aligned_to: Option<ItemKey>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl Idea {
    /// Score used for ordering; unscored ideas rank below every scored one.
    pub fn effective_score(&self) -> i32 {
        self.score.unwrap_or(-1)
    }
}
