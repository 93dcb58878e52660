//! Roadmap-Bucket Synchronizer.
//!
//! Once an epic's work is in the window, the roadmap column of every idea
//! delivered by it mirrors where that work sits. Ideas whose epic has no
//! placement, or is placed beyond the window, are left alone.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use serde_json::json;

use sprintline_common::{BucketId, Field, Idea, ItemKey, WorkItem};

use super::window::ColumnWindow;
use crate::errors::CycleError;
use crate::tracker::{ItemFilter, RetryPolicy, Tracker, with_retry};

/// Effective bucket of each epic.
///
/// The latest window bucket among the epic's open children wins; an epic
/// without placed children falls back to its own bucket.
pub fn epic_buckets(
    epics: &[WorkItem],
    children: &[WorkItem],
    window: &ColumnWindow,
) -> HashMap<ItemKey, BucketId> {
    let mut latest: HashMap<&ItemKey, (usize, BucketId)> = HashMap::new();
    for child in children {
        if child.status.is_done() {
            continue;
        }
        let (Some(parent), Some(bucket)) = (&child.parent, child.bucket) else {
            continue;
        };
        let Some(column) = window.column_for(bucket) else {
            continue;
        };
        let entry = latest.entry(parent).or_insert((column.ordinal, bucket));
        if column.ordinal > entry.0 {
            *entry = (column.ordinal, bucket);
        }
    }

    epics
        .iter()
        .filter_map(|epic| {
            let bucket = latest
                .get(&epic.key)
                .map(|(_, bucket)| *bucket)
                .or(epic.bucket)?;
            Some((epic.key.clone(), bucket))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnUpdate {
    pub idea: ItemKey,
    pub from: Option<String>,
    pub to: String,
}

/// Column writes needed so each delivered idea matches its epic.
pub fn plan_sync(
    ideas: &[Idea],
    placements: &HashMap<ItemKey, BucketId>,
    window: &ColumnWindow,
) -> Vec<ColumnUpdate> {
    ideas
        .iter()
        .filter_map(|idea| {
            let epic = idea.delivery_epic.as_ref()?;
            let bucket = placements.get(epic)?;
            let Some(column) = window.column_for(*bucket) else {
                tracing::debug!(idea = %idea.key, %epic, %bucket, "Epic bucket outside the window");
                return None;
            };
            (idea.column.as_deref() != Some(column.label.as_str())).then(|| ColumnUpdate {
                idea: idea.key.clone(),
                from: idea.column.clone(),
                to: column.label.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub updated: Vec<ColumnUpdate>,
    pub failed: Vec<ItemKey>,
}

/// Read epics and their children for the given delivery links.
pub async fn load_placements(
    tracker: &dyn Tracker,
    epic_keys: Vec<ItemKey>,
    window: &ColumnWindow,
    stage: &'static str,
    retry: &RetryPolicy,
) -> Result<HashMap<ItemKey, BucketId>, CycleError> {
    if epic_keys.is_empty() {
        return Ok(HashMap::new());
    }
    let by_key = ItemFilter::Keys(epic_keys.clone());
    let epics = with_retry(retry, "query_items", || tracker.query_items(&by_key))
        .await
        .map_err(|source| CycleError::Observe { stage, source })?;
    let by_parent = ItemFilter::ChildrenOf(epic_keys);
    let children = with_retry(retry, "query_items", || tracker.query_items(&by_parent))
        .await
        .map_err(|source| CycleError::Observe { stage, source })?;
    Ok(epic_buckets(&epics, &children, window))
}

/// Epics referenced by delivery links, deduplicated and sorted.
pub fn delivery_epics<'a>(ideas: impl IntoIterator<Item = &'a Idea>) -> Vec<ItemKey> {
    ideas
        .into_iter()
        .filter_map(|idea| idea.delivery_epic.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Sync stage.
pub async fn synchronize(
    tracker: &dyn Tracker,
    window: &ColumnWindow,
    retry: &RetryPolicy,
) -> Result<SyncReport, CycleError> {
    let ideas = with_retry(retry, "query_ideas", || tracker.query_ideas())
        .await
        .map_err(|source| CycleError::Observe { stage: "sync", source })?;
    let placements = load_placements(tracker, delivery_epics(&ideas), window, "sync", retry).await?;

    let mut report = SyncReport::default();
    for update in plan_sync(&ideas, &placements, window) {
        let result = with_retry(retry, "set_field", || {
            tracker.set_field(&update.idea, Field::RoadmapColumn, json!(update.to))
        })
        .await;
        match result {
            Ok(()) => {
                tracing::info!(idea = %update.idea, from = ?update.from, to = %update.to, "Synced roadmap column");
                report.updated.push(update);
            }
            Err(e) => {
                tracing::warn!(idea = %update.idea, error = %e, "Roadmap column sync failed");
                report.failed.push(update.idea);
            }
        }
    }
    Ok(report)
}
