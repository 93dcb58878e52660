//! Tracker boundary.
//!
//! The tracker is the only persistent store. Every stage reads through
//! [`Tracker`] at its start and writes single fields back; nothing read here
//! survives the cycle.
//!
//! | Module   | Responsibility                                              |
//! |----------|-------------------------------------------------------------|
//! | `jira`   | `JiraTracker`: REST + agile API client over `reqwest`       |
//! | `memory` | `InMemoryTracker`: fake with mutation log, failure injection|
//! | `retry`  | `RetryPolicy` + `with_retry()` exponential backoff          |

pub mod jira;
pub mod memory;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;

use sprintline_common::{
    Bucket, BucketDraft, BucketId, BucketState, Field, Idea, ItemKey, ItemStatus, LinkType,
    NewItem, WorkItem,
};

use crate::errors::TrackerError;

pub use jira::JiraTracker;
pub use memory::{InMemoryTracker, Mutation};
pub use retry::{RetryPolicy, with_retry};

/// Work item selection for [`Tracker::query_items`].
///
/// Results always come back in the tracker's current rank order.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemFilter {
    /// Members of one bucket.
    InBucket(BucketId),
    /// Items with no open bucket (never scheduled or left in a closed one).
    Unscheduled {
        statuses: Vec<ItemStatus>,
        assignee: Option<String>,
    },
    /// Children of the given epics.
    ChildrenOf(Vec<ItemKey>),
    /// Specific items by key.
    Keys(Vec<ItemKey>),
}

/// Abstraction over the remote tracker for testability.
/// Real implementation: `JiraTracker`. Test double: `InMemoryTracker`.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// All matching items, paging transparently.
    async fn query_items(&self, filter: &ItemFilter) -> Result<Vec<WorkItem>, TrackerError>;

    async fn query_ideas(&self) -> Result<Vec<Idea>, TrackerError>;

    /// Buckets in `state`, sorted by start date.
    async fn buckets(&self, state: BucketState) -> Result<Vec<Bucket>, TrackerError>;

    async fn create_bucket(&self, draft: &BucketDraft) -> Result<Bucket, TrackerError>;

    async fn set_bucket_state(&self, id: BucketId, state: BucketState)
    -> Result<(), TrackerError>;

    async fn move_to_bucket(&self, key: &ItemKey, bucket: BucketId) -> Result<(), TrackerError>;

    /// Rank `key` directly before `before`.
    async fn rank_before(&self, key: &ItemKey, before: &ItemKey) -> Result<(), TrackerError>;

    /// `Value::Null` clears the field.
    async fn set_field(&self, key: &ItemKey, field: Field, value: Value)
    -> Result<(), TrackerError>;

    async fn transition(&self, key: &ItemKey, status: &str) -> Result<(), TrackerError>;

    async fn create_item(&self, item: &NewItem) -> Result<ItemKey, TrackerError>;

    async fn create_link(
        &self,
        from: &ItemKey,
        to: &ItemKey,
        link: LinkType,
    ) -> Result<(), TrackerError>;

    /// Roadmap column labels in display order.
    async fn roadmap_columns(&self) -> Result<Vec<String>, TrackerError>;

    /// Insert a column directly after `after`, or first when `after` is `None`.
    async fn add_roadmap_column(&self, label: &str, after: Option<&str>) -> Result<(), TrackerError>;

    /// Remove a column. Ideas in it lose their column.
    async fn retire_roadmap_column(&self, label: &str) -> Result<(), TrackerError>;
}
