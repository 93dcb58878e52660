use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bucket::BucketId;
use crate::key::ItemKey;

/// Workflow status of a work item.
///
/// Tracker workflows carry many status names; they collapse onto the five
/// states the engine reasons about. Any name that is not a known backlog,
/// ready, in-progress or done state is an intermediate review state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemStatus {
    Backlog,
    Ready,
    InProgress,
    Review(String),
    Done,
}

impl ItemStatus {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "backlog" | "to do" | "todo" | "open" => Self::Backlog,
            "ready" | "selected for development" => Self::Ready,
            "in progress" | "in_progress" => Self::InProgress,
            "done" | "released" | "closed" => Self::Done,
            _ => Self::Review(name.trim().to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Backlog => "Backlog",
            Self::Ready => "Ready",
            Self::InProgress => "In Progress",
            Self::Review(name) => name,
            Self::Done => "Done",
        }
    }

    /// Committed work counts against bucket capacity and may be moved.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Backlog | Self::Ready)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl From<String> for ItemStatus {
    fn from(s: String) -> Self {
        Self::from_name(&s)
    }
}

impl From<ItemStatus> for String {
    fn from(s: ItemStatus) -> Self {
        s.name().to_string()
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Platform-native priority field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Highest,
    High,
    Medium,
    Low,
    Lowest,
}

impl Priority {
    /// Rank used for ordering, 1 = most urgent.
    pub fn rank(self) -> u32 {
        match self {
            Self::Highest => 1,
            Self::High => 2,
            Self::Medium => 3,
            Self::Low => 4,
            Self::Lowest => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Highest => "Highest",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Lowest => "Lowest",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Highest" => Ok(Self::Highest),
            "High" => Ok(Self::High),
            "Medium" => Ok(Self::Medium),
            "Low" => Ok(Self::Low),
            "Lowest" => Ok(Self::Lowest),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemKind {
    Epic,
    Task,
    Bug,
    Other(String),
}

impl ItemKind {
    pub fn name(&self) -> &str {
        match self {
            Self::Epic => "Epic",
            Self::Task => "Task",
            Self::Bug => "Bug",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ItemKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Epic" => Self::Epic,
            "Task" => Self::Task,
            "Bug" => Self::Bug,
            _ => Self::Other(s),
        }
    }
}

impl From<ItemKind> for String {
    fn from(k: ItemKind) -> Self {
        k.name().to_string()
    }
}

/// A unit of delivery work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub key: ItemKey,
    #[serde(default)]
    pub summary: String,
    pub kind: ItemKind,
    pub status: ItemStatus,
    /// Story points. Missing sizes are a data problem, not zero.
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub parent: Option<ItemKey>,
    #[serde(default)]
    pub bucket: Option<BucketId>,
    #[serde(default)]
    pub assignee: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Size counted against capacity, zero for uncommitted items.
    pub fn committed_size(&self) -> f64 {
        if self.status.is_committed() {
            self.size.unwrap_or(0.0)
        } else {
            0.0
        }
    }

    pub fn is_epic(&self) -> bool {
        matches!(self.kind, ItemKind::Epic)
    }
}

/// Writable fields addressed by `Tracker::set_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    RoadmapColumn,
    Classification,
    StoryPoints,
    Summary,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoadmapColumn => "roadmap_column",
            Self::Classification => "classification",
            Self::StoryPoints => "story_points",
            Self::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Idea to the Epic that delivers it.
    Delivery,
    /// Secondary idea to the primary idea it was aligned with.
    Alignment,
}

/// Fields for a newly created work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub kind: ItemKind,
    pub summary: String,
    #[serde(default)]
    pub parent: Option<ItemKey>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_collapse_onto_engine_states() {
        assert_eq!(ItemStatus::from_name("To Do"), ItemStatus::Backlog);
        assert_eq!(ItemStatus::from_name("Ready"), ItemStatus::Ready);
        assert_eq!(ItemStatus::from_name("In Progress"), ItemStatus::InProgress);
        assert_eq!(ItemStatus::from_name("Released"), ItemStatus::Done);
        assert_eq!(
            ItemStatus::from_name("Code Review"),
            ItemStatus::Review("Code Review".to_string())
        );
    }

    #[test]
    fn only_backlog_and_ready_are_committed() {
        assert!(ItemStatus::Backlog.is_committed());
        assert!(ItemStatus::Ready.is_committed());
        assert!(!ItemStatus::InProgress.is_committed());
        assert!(!ItemStatus::Review("QA".into()).is_committed());
        assert!(!ItemStatus::Done.is_committed());
    }

    #[test]
    fn priority_rank_matches_severity() {
        assert!(Priority::Highest.rank() < Priority::Lowest.rank());
        assert_eq!("Medium".parse::<Priority>().unwrap(), Priority::Medium);
        assert!("Urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn work_item_deserializes_from_fixture_shape() {
        let json = r#"{
            "key": "AX-7",
            "kind": "Task",
            "status": "To Do",
            "size": 3,
            "priority": "High",
            "bucket": 12,
            "created": "2026-01-05T00:00:00Z"
        }"#;
        let item: WorkItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.status, ItemStatus::Backlog);
        assert_eq!(item.size, Some(3.0));
        assert_eq!(item.bucket, Some(BucketId(12)));
        assert_eq!(item.committed_size(), 3.0);
    }

    #[test]
    fn uncommitted_items_have_no_committed_size() {
        let json = r#"{"key": "AX-8", "kind": "Bug", "status": "In Progress", "size": 5, "created": "2026-01-05T00:00:00Z"}"#;
        let item: WorkItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.committed_size(), 0.0);
    }
}
