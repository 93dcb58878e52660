//! Roadmap stage: idea placement and promotion.
//!
//! Unplaced primary ideas are ranked into the future columns, a bounded
//! number per column. Placed primary ideas that score well enough and have
//! no delivery epic yet get one created and linked.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::json;

use sprintline_common::{Field, Idea, ItemKey, ItemKind, LinkType, NewItem, Swimlane};

use super::priority::{RankContext, rank_ideas};
use super::sync;
use super::window::ColumnWindow;
use crate::errors::CycleError;
use crate::tracker::{RetryPolicy, Tracker, with_retry};

#[derive(Debug, Clone)]
pub struct RoadmapSettings {
    pub max_per_column: usize,
    pub promote: bool,
    pub promote_min_score: i32,
    pub delivery_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub idea: ItemKey,
    pub column: String,
}

/// Whether an idea still needs a column from this stage.
///
/// Ideas delivered by an epic that already sits in the window get their
/// column from the synchronizer instead.
fn needs_column(idea: &Idea, window: &ColumnWindow, placed_epics: &HashSet<ItemKey>) -> bool {
    if idea.swimlane != Swimlane::Primary {
        return false;
    }
    if idea
        .column
        .as_deref()
        .is_some_and(|c| window.ordinal_of(c).is_some())
    {
        return false;
    }
    !idea
        .delivery_epic
        .as_ref()
        .is_some_and(|epic| placed_epics.contains(epic))
}

/// Rank unplaced ideas into columns 1..W-1, at most `max_per_column` each.
pub fn plan_placement(
    ideas: &[Idea],
    window: &ColumnWindow,
    placed_epics: &HashSet<ItemKey>,
    max_per_column: usize,
) -> Vec<Placement> {
    let mut occupancy: HashMap<&str, usize> = HashMap::new();
    for idea in ideas {
        if let Some(column) = idea.column.as_deref() {
            *occupancy.entry(column).or_insert(0) += 1;
        }
    }

    let mut pending: Vec<Idea> = ideas
        .iter()
        .filter(|idea| needs_column(idea, window, placed_epics))
        .cloned()
        .collect();
    rank_ideas(&mut pending, &RankContext::new(&[], &window.labels()));
    let mut pending = pending.into_iter();

    let mut plan = Vec::new();
    for column in window.future() {
        let taken = occupancy.get(column.label.as_str()).copied().unwrap_or(0);
        for idea in pending.by_ref().take(max_per_column.saturating_sub(taken)) {
            plan.push(Placement {
                idea: idea.key,
                column: column.label.clone(),
            });
        }
    }
    plan
}

/// Placed primary ideas ready to become delivery epics, in resolver order.
pub fn promotion_candidates<'a>(
    ideas: &'a [Idea],
    window: &ColumnWindow,
    min_score: i32,
) -> Vec<&'a Idea> {
    let mut candidates: Vec<&Idea> = ideas
        .iter()
        .filter(|idea| {
            idea.swimlane == Swimlane::Primary
                && idea.delivery_epic.is_none()
                && idea.score.is_some_and(|s| s >= min_score)
                && idea
                    .column
                    .as_deref()
                    .is_some_and(|c| window.ordinal_of(c).is_some())
        })
        .collect();
    let ctx = RankContext::new(&[], &window.labels());
    candidates.sort_by_cached_key(|idea| ctx.idea_key(idea));
    candidates
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoadmapReport {
    pub placed: Vec<Placement>,
    /// Idea key to the epic created for it.
    pub promoted: Vec<(ItemKey, ItemKey)>,
    pub failed: Vec<ItemKey>,
}

/// Roadmap stage.
pub async fn arrange(
    tracker: &dyn Tracker,
    window: &ColumnWindow,
    settings: &RoadmapSettings,
    retry: &RetryPolicy,
) -> Result<RoadmapReport, CycleError> {
    let mut ideas = with_retry(retry, "query_ideas", || tracker.query_ideas())
        .await
        .map_err(|source| CycleError::Observe { stage: "roadmap", source })?;
    let epic_keys = sync::delivery_epics(&ideas);
    let placed_epics: HashSet<ItemKey> = sync::load_placements(tracker, epic_keys, window, "roadmap", retry)
        .await?
        .into_iter()
        .filter(|(_, bucket)| window.column_for(*bucket).is_some())
        .map(|(epic, _)| epic)
        .collect();

    let mut report = RoadmapReport::default();
    for placement in plan_placement(&ideas, window, &placed_epics, settings.max_per_column) {
        let result = with_retry(retry, "set_field", || {
            tracker.set_field(&placement.idea, Field::RoadmapColumn, json!(placement.column))
        })
        .await;
        match result {
            Ok(()) => {
                tracing::info!(idea = %placement.idea, column = %placement.column, "Placed idea");
                if let Some(idea) = ideas.iter_mut().find(|i| i.key == placement.idea) {
                    idea.column = Some(placement.column.clone());
                }
                report.placed.push(placement);
            }
            Err(e) => {
                tracing::warn!(idea = %placement.idea, error = %e, "Could not place idea");
                report.failed.push(placement.idea);
            }
        }
    }

    if settings.promote {
        for idea in promotion_candidates(&ideas, window, settings.promote_min_score) {
            match promote(tracker, idea, &settings.delivery_status, retry).await {
                Ok(epic) => report.promoted.push((idea.key.clone(), epic)),
                Err(e) => {
                    tracing::warn!(idea = %idea.key, error = %e, "Promotion failed");
                    report.failed.push(idea.key.clone());
                }
            }
        }
    }
    Ok(report)
}

/// Create the delivery epic for `idea`, link it and move the idea on.
///
/// A link failure after the epic exists leaves an orphan epic that the next
/// cycle does not see; it is logged with both keys.
async fn promote(
    tracker: &dyn Tracker,
    idea: &Idea,
    delivery_status: &str,
    retry: &RetryPolicy,
) -> Result<ItemKey, crate::errors::TrackerError> {
    let draft = NewItem {
        kind: ItemKind::Epic,
        summary: idea.summary.clone(),
        parent: None,
        priority: None,
    };
    let epic = with_retry(retry, "create_item", || tracker.create_item(&draft)).await?;
    if let Err(e) = with_retry(retry, "create_link", || {
        tracker.create_link(&idea.key, &epic, LinkType::Delivery)
    })
    .await
    {
        tracing::error!(idea = %idea.key, %epic, error = %e, "Epic created but not linked");
        return Err(e);
    }
    tracing::info!(idea = %idea.key, %epic, "Promoted idea to epic");

    if !delivery_status.is_empty()
        && let Err(e) = with_retry(retry, "transition", || tracker.transition(&idea.key, delivery_status)).await
    {
        tracing::warn!(idea = %idea.key, status = delivery_status, error = %e, "Could not transition promoted idea");
    }
    Ok(epic)
}
