use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(pub u64);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketState {
    Active,
    Future,
    Closed,
}

impl BucketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Future => "future",
            Self::Closed => "closed",
        }
    }
}

/// A time-boxed delivery bucket (sprint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
    pub name: String,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    pub state: BucketState,
}

/// A bucket the window manager asks the tracker to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDraft {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BucketDraft {
    /// Drafts are named after their calendar period: `dd/mm/YYYY - dd/mm/YYYY`.
    pub fn for_period(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            name: format!("{} - {}", start.format("%d/%m/%Y"), end.format("%d/%m/%Y")),
            start,
            end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_name_uses_day_first_dates() {
        let draft = BucketDraft::for_period(
            NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
        );
        assert_eq!(draft.name, "20/10/2026 - 02/11/2026");
    }

    #[test]
    fn bucket_state_serializes_snake_case() {
        let json = serde_json::to_string(&BucketState::Future).unwrap();
        assert_eq!(json, r#""future""#);
    }
}
