//! Priority Resolver.
//!
//! Signals, highest precedence first:
//! 1. column ordinal of the linked idea (earlier column first)
//! 2. idea score (higher first; unscored counts as -1)
//! 3. platform priority (Highest first; missing ranks last)
//! 4. natural key order
//!
//! The key is always the final component, so two distinct items never
//! compare equal and sorting is a strict total order.

use std::collections::HashMap;

use sprintline_common::{Idea, ItemKey, WorkItem};

/// Rank of a missing platform priority.
const NO_PRIORITY: u32 = 999;

/// Sort key; smaller sorts first (higher priority).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    column: usize,
    /// Negated score so that higher scores sort first.
    neg_score: i32,
    priority: u32,
    key: ItemKey,
}

impl OrderKey {
    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn column(&self) -> Option<usize> {
        (self.column != usize::MAX).then_some(self.column)
    }

    pub fn score(&self) -> i32 {
        -self.neg_score
    }
}

/// Idea signals available to the resolver for one ranking pass.
#[derive(Debug, Clone, Default)]
pub struct RankContext {
    /// Epic key to the (column ordinal, score) of the idea delivered by it.
    by_epic: HashMap<ItemKey, (Option<usize>, i32)>,
    /// Column label to ordinal in the current window.
    columns: HashMap<String, usize>,
}

impl RankContext {
    /// `columns` are the window's labels in ordinal order.
    pub fn new(ideas: &[Idea], columns: &[String]) -> Self {
        let columns: HashMap<String, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        let mut by_epic = HashMap::new();
        for idea in ideas {
            let Some(epic) = &idea.delivery_epic else {
                continue;
            };
            let column = idea.column.as_ref().and_then(|c| columns.get(c).copied());
            let signal = (column, idea.effective_score());
            // Several ideas on one epic: keep the strongest signal.
            by_epic
                .entry(epic.clone())
                .and_modify(|existing: &mut (Option<usize>, i32)| {
                    if signal_key(signal) < signal_key(*existing) {
                        *existing = signal;
                    }
                })
                .or_insert(signal);
        }
        Self { by_epic, columns }
    }

    fn idea_signal(&self, item: &WorkItem) -> Option<(Option<usize>, i32)> {
        if item.is_epic()
            && let Some(signal) = self.by_epic.get(&item.key)
        {
            return Some(*signal);
        }
        item.parent
            .as_ref()
            .and_then(|parent| self.by_epic.get(parent))
            .copied()
    }

    pub fn rank(&self, item: &WorkItem) -> OrderKey {
        let (column, score) = self.idea_signal(item).unwrap_or((None, -1));
        OrderKey {
            column: column.unwrap_or(usize::MAX),
            neg_score: -score,
            priority: item.priority.map_or(NO_PRIORITY, |p| p.rank()),
            key: item.key.clone(),
        }
    }

    pub fn idea_key(&self, idea: &Idea) -> OrderKey {
        let column = idea.column.as_ref().and_then(|c| self.columns.get(c).copied());
        OrderKey {
            column: column.unwrap_or(usize::MAX),
            neg_score: -idea.effective_score(),
            priority: NO_PRIORITY,
            key: idea.key.clone(),
        }
    }
}

fn signal_key((column, score): (Option<usize>, i32)) -> (usize, i32) {
    (column.unwrap_or(usize::MAX), -score)
}

/// Sort work items into resolver order, highest priority first.
pub fn rank_items(items: &mut [WorkItem], ctx: &RankContext) {
    items.sort_by_cached_key(|item| ctx.rank(item));
}

/// Sort ideas into resolver order, highest priority first.
pub fn rank_ideas(ideas: &mut [Idea], ctx: &RankContext) {
    ideas.sort_by_cached_key(|idea| ctx.idea_key(idea));
}
