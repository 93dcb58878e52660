//! In-memory tracker.
//!
//! Holds a whole board in process, records every mutation and can be told to
//! fail mutations on specific keys. Tests use it as the fake tracker; the
//! `simulate` command loads it from a JSON fixture.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sprintline_common::{
    Bucket, BucketDraft, BucketId, BucketState, Field, Idea, ItemKey, ItemKind, ItemStatus,
    LinkType, NewItem, WorkItem,
};

use super::{ItemFilter, Tracker};
use crate::errors::TrackerError;

/// Serialized board used by fixtures and snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardFixture {
    #[serde(default = "default_project")]
    pub project_key: String,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
    /// Work items in rank order.
    #[serde(default)]
    pub items: Vec<WorkItem>,
    #[serde(default)]
    pub ideas: Vec<Idea>,
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_project() -> String {
    "AX".to_string()
}

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    MoveToBucket { key: ItemKey, bucket: BucketId },
    RankBefore { key: ItemKey, before: ItemKey },
    SetField { key: ItemKey, field: Field, value: Value },
    Transition { key: ItemKey, status: String },
    CreateItem { key: ItemKey, summary: String },
    CreateLink { from: ItemKey, to: ItemKey, link: LinkType },
    CreateBucket { id: BucketId, name: String },
    SetBucketState { id: BucketId, state: BucketState },
    AddColumn { label: String, after: Option<String> },
    RetireColumn { label: String },
}

/// Failure injected for writes touching a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Transient,
    Permanent,
}

#[derive(Debug, Default)]
struct BoardState {
    board: BoardFixture,
    mutations: Vec<Mutation>,
    failures: HashMap<ItemKey, (InjectedFailure, u32)>,
    failed_reads: u32,
}

#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: Mutex<BoardState>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(board: BoardFixture) -> Self {
        Self {
            state: Mutex::new(BoardState {
                board,
                ..Default::default()
            }),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_fixture(serde_json::from_str(json)?))
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> BoardFixture {
        self.state().board.clone()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    /// Fail the next `times` writes that touch `key`.
    pub fn fail_writes(&self, key: &ItemKey, failure: InjectedFailure, times: u32) {
        self.state().failures.insert(key.clone(), (failure, times));
    }

    /// Fail the next `times` item queries with a transient error.
    pub fn fail_reads(&self, times: u32) {
        self.state().failed_reads = times;
    }

    pub fn item(&self, key: &str) -> Option<WorkItem> {
        let key = ItemKey::from(key);
        self.state().board.items.iter().find(|i| i.key == key).cloned()
    }

    pub fn idea(&self, key: &str) -> Option<Idea> {
        let key = ItemKey::from(key);
        self.state().board.ideas.iter().find(|i| i.key == key).cloned()
    }
}

impl BoardState {
    fn check_failure(&mut self, key: &ItemKey) -> Result<(), TrackerError> {
        let Some((failure, remaining)) = self.failures.get_mut(key) else {
            return Ok(());
        };
        if *remaining == 0 {
            return Ok(());
        }
        *remaining -= 1;
        Err(match failure {
            InjectedFailure::Transient => TrackerError::Transient(format!("injected for {}", key)),
            InjectedFailure::Permanent => TrackerError::PermissionDenied(format!("injected for {}", key)),
        })
    }

    fn item_mut(&mut self, key: &ItemKey) -> Result<&mut WorkItem, TrackerError> {
        self.board
            .items
            .iter_mut()
            .find(|i| &i.key == key)
            .ok_or_else(|| TrackerError::NotFound {
                what: format!("Issue {}", key),
            })
    }

    fn idea_mut(&mut self, key: &ItemKey) -> Result<&mut Idea, TrackerError> {
        self.board
            .ideas
            .iter_mut()
            .find(|i| &i.key == key)
            .ok_or_else(|| TrackerError::NotFound {
                what: format!("Idea {}", key),
            })
    }

    fn is_open_bucket(&self, id: BucketId) -> bool {
        self.board
            .buckets
            .iter()
            .any(|b| b.id == id && b.state != BucketState::Closed)
    }

    fn next_key(&self) -> ItemKey {
        let prefix = &self.board.project_key;
        let next = self
            .board
            .items
            .iter()
            .filter_map(|i| {
                i.key
                    .as_str()
                    .strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .and_then(|n| n.parse::<u64>().ok())
            })
            .max()
            .unwrap_or(0)
            + 1;
        ItemKey::new(format!("{}-{}", prefix, next))
    }
}

fn string_value(value: &Value) -> Result<Option<String>, TrackerError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(TrackerError::Rejected {
            status: 400,
            message: format!("expected string, got {}", other),
        }),
    }
}

#[async_trait]
impl Tracker for InMemoryTracker {
    async fn query_items(&self, filter: &ItemFilter) -> Result<Vec<WorkItem>, TrackerError> {
        let mut state = self.state();
        if state.failed_reads > 0 {
            state.failed_reads -= 1;
            return Err(TrackerError::Transient("injected read failure".into()));
        }
        let items = state
            .board
            .items
            .iter()
            .filter(|item| match filter {
                ItemFilter::InBucket(id) => item.bucket == Some(*id),
                ItemFilter::Unscheduled { statuses, assignee } => {
                    let unscheduled = item.bucket.is_none_or(|b| !state.is_open_bucket(b));
                    let status_ok = statuses.is_empty() || statuses.contains(&item.status);
                    let assignee_ok = assignee
                        .as_ref()
                        .is_none_or(|a| item.assignee.as_ref() == Some(a));
                    unscheduled && status_ok && assignee_ok
                }
                ItemFilter::ChildrenOf(epics) => {
                    item.parent.as_ref().is_some_and(|p| epics.contains(p))
                }
                ItemFilter::Keys(keys) => keys.contains(&item.key),
            })
            .cloned()
            .collect();
        Ok(items)
    }

    async fn query_ideas(&self) -> Result<Vec<Idea>, TrackerError> {
        Ok(self.state().board.ideas.clone())
    }

    async fn buckets(&self, state: BucketState) -> Result<Vec<Bucket>, TrackerError> {
        let mut buckets: Vec<Bucket> = self
            .state()
            .board
            .buckets
            .iter()
            .filter(|b| b.state == state)
            .cloned()
            .collect();
        buckets.sort_by(|a, b| {
            (a.start.is_none(), a.start, a.id).cmp(&(b.start.is_none(), b.start, b.id))
        });
        Ok(buckets)
    }

    async fn create_bucket(&self, draft: &BucketDraft) -> Result<Bucket, TrackerError> {
        let mut state = self.state();
        let id = BucketId(
            state
                .board
                .buckets
                .iter()
                .map(|b| b.id.0)
                .max()
                .unwrap_or(0)
                + 1,
        );
        let bucket = Bucket {
            id,
            name: draft.name.clone(),
            start: Some(draft.start),
            end: Some(draft.end),
            state: BucketState::Future,
        };
        state.board.buckets.push(bucket.clone());
        state.mutations.push(Mutation::CreateBucket {
            id,
            name: draft.name.clone(),
        });
        Ok(bucket)
    }

    async fn set_bucket_state(
        &self,
        id: BucketId,
        new_state: BucketState,
    ) -> Result<(), TrackerError> {
        let mut state = self.state();
        let bucket = state
            .board
            .buckets
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| TrackerError::NotFound {
                what: format!("Sprint {}", id),
            })?;
        bucket.state = new_state;
        state.mutations.push(Mutation::SetBucketState {
            id,
            state: new_state,
        });
        Ok(())
    }

    async fn move_to_bucket(&self, key: &ItemKey, bucket: BucketId) -> Result<(), TrackerError> {
        let mut state = self.state();
        state.check_failure(key)?;
        if !state.is_open_bucket(bucket) {
            return Err(TrackerError::Rejected {
                status: 400,
                message: format!("Sprint {} is not open", bucket),
            });
        }
        state.item_mut(key)?.bucket = Some(bucket);
        state.mutations.push(Mutation::MoveToBucket {
            key: key.clone(),
            bucket,
        });
        Ok(())
    }

    async fn rank_before(&self, key: &ItemKey, before: &ItemKey) -> Result<(), TrackerError> {
        let mut state = self.state();
        state.check_failure(key)?;
        let items = &mut state.board.items;
        let from = items
            .iter()
            .position(|i| &i.key == key)
            .ok_or_else(|| TrackerError::NotFound {
                what: format!("Issue {}", key),
            })?;
        let item = items.remove(from);
        let Some(to) = items.iter().position(|i| &i.key == before) else {
            items.insert(from, item);
            return Err(TrackerError::NotFound {
                what: format!("Issue {}", before),
            });
        };
        items.insert(to, item);
        state.mutations.push(Mutation::RankBefore {
            key: key.clone(),
            before: before.clone(),
        });
        Ok(())
    }

    async fn set_field(
        &self,
        key: &ItemKey,
        field: Field,
        value: Value,
    ) -> Result<(), TrackerError> {
        let mut state = self.state();
        state.check_failure(key)?;
        match field {
            Field::RoadmapColumn => {
                let column = string_value(&value)?;
                if let Some(label) = &column
                    && !state.board.columns.contains(label)
                {
                    return Err(TrackerError::Rejected {
                        status: 400,
                        message: format!("Unknown roadmap column '{}'", label),
                    });
                }
                state.idea_mut(key)?.column = column;
            }
            Field::Classification => {
                let tag = string_value(&value)?;
                state.idea_mut(key)?.classification = tag;
            }
            Field::StoryPoints => {
                let size = value.as_f64();
                state.item_mut(key)?.size = size;
            }
            Field::Summary => {
                let summary = string_value(&value)?.unwrap_or_default();
                state.item_mut(key)?.summary = summary;
            }
        }
        state.mutations.push(Mutation::SetField {
            key: key.clone(),
            field,
            value,
        });
        Ok(())
    }

    async fn transition(&self, key: &ItemKey, status: &str) -> Result<(), TrackerError> {
        let mut state = self.state();
        state.check_failure(key)?;
        if state.board.ideas.iter().any(|i| &i.key == key) {
            state.idea_mut(key)?.status = Some(status.to_string());
        } else {
            state.item_mut(key)?.status = ItemStatus::from_name(status);
        }
        state.mutations.push(Mutation::Transition {
            key: key.clone(),
            status: status.to_string(),
        });
        Ok(())
    }

    async fn create_item(&self, item: &NewItem) -> Result<ItemKey, TrackerError> {
        let mut state = self.state();
        let key = state.next_key();
        state.board.items.push(WorkItem {
            key: key.clone(),
            summary: item.summary.clone(),
            kind: item.kind.clone(),
            status: ItemStatus::Backlog,
            size: None,
            priority: item.priority,
            parent: item.parent.clone(),
            bucket: None,
            assignee: None,
            created: Utc::now(),
            updated: None,
        });
        state.mutations.push(Mutation::CreateItem {
            key: key.clone(),
            summary: item.summary.clone(),
        });
        Ok(key)
    }

    async fn create_link(
        &self,
        from: &ItemKey,
        to: &ItemKey,
        link: LinkType,
    ) -> Result<(), TrackerError> {
        let mut state = self.state();
        state.check_failure(from)?;
        match link {
            LinkType::Delivery => {
                let is_epic = state
                    .board
                    .items
                    .iter()
                    .any(|i| &i.key == to && i.kind == ItemKind::Epic);
                if !is_epic {
                    return Err(TrackerError::Rejected {
                        status: 400,
                        message: format!("{} is not an epic", to),
                    });
                }
                state.idea_mut(from)?.delivery_epic = Some(to.clone());
            }
            LinkType::Alignment => {
                if !state.board.ideas.iter().any(|i| &i.key == to) {
                    return Err(TrackerError::NotFound {
                        what: format!("Idea {}", to),
                    });
                }
                state.idea_mut(from)?.aligned_to = Some(to.clone());
            }
        }
        state.mutations.push(Mutation::CreateLink {
            from: from.clone(),
            to: to.clone(),
            link,
        });
        Ok(())
    }

    async fn roadmap_columns(&self) -> Result<Vec<String>, TrackerError> {
        Ok(self.state().board.columns.clone())
    }

    async fn add_roadmap_column(&self, label: &str, after: Option<&str>) -> Result<(), TrackerError> {
        let mut state = self.state();
        if !state.board.columns.iter().any(|c| c == label) {
            let at = match after {
                Some(anchor) => state
                    .board
                    .columns
                    .iter()
                    .position(|c| c == anchor)
                    .map(|i| i + 1)
                    .ok_or_else(|| TrackerError::NotFound {
                        what: format!("Roadmap column '{}'", anchor),
                    })?,
                None => 0,
            };
            state.board.columns.insert(at, label.to_string());
        }
        state.mutations.push(Mutation::AddColumn {
            label: label.to_string(),
            after: after.map(str::to_string),
        });
        Ok(())
    }

    async fn retire_roadmap_column(&self, label: &str) -> Result<(), TrackerError> {
        let mut state = self.state();
        state.board.columns.retain(|c| c != label);
        for idea in state.board.ideas.iter_mut() {
            if idea.column.as_deref() == Some(label) {
                idea.column = None;
            }
        }
        state.mutations.push(Mutation::RetireColumn {
            label: label.to_string(),
        });
        Ok(())
    }
}
