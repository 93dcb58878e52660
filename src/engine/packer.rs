//! Capacity Packer.
//!
//! For each future bucket in ordinal order, walk the remaining ranked items
//! and take every one that fits the bucket's remaining capacity. Items that
//! do not fit stay available for later buckets; whatever is left at the end
//! is unassigned until the next cycle. Items are never split.

use serde::Serialize;

use sprintline_common::{BucketId, ItemKey, WorkItem};

use super::SIZE_EPSILON;
use super::window::ColumnWindow;
use crate::tracker::{RetryPolicy, Tracker, with_retry};

/// A future bucket with the capacity it has left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSlot {
    pub bucket: BucketId,
    pub remaining: f64,
}

impl BucketSlot {
    /// Remaining capacity given the bucket's current members.
    pub fn new(bucket: BucketId, members: &[WorkItem], capacity: f64) -> Self {
        let committed: f64 = members.iter().map(WorkItem::committed_size).sum();
        Self {
            bucket,
            remaining: capacity - committed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub key: ItemKey,
    pub bucket: BucketId,
    pub size: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackPlan {
    pub assignments: Vec<Assignment>,
    /// Sized items no bucket could take this cycle.
    pub unassigned: Vec<ItemKey>,
    /// Items skipped because they have no usable size.
    pub unsized_items: Vec<ItemKey>,
}

/// Plan assignments for `ranked` (highest priority first) into `slots`
/// (ordinal order, active bucket excluded).
/// Backlog items the packer may place.
///
/// Epics are dropped, and so is anything already in a window bucket, active
/// included. A backlog query can return such items when they once sat in a
/// closed bucket.
pub fn backlog_candidates(items: Vec<WorkItem>, window: &ColumnWindow) -> Vec<WorkItem> {
    items
        .into_iter()
        .filter(|item| {
            if item.is_epic() {
                return false;
            }
            match item.bucket.and_then(|b| window.column_for(b)) {
                Some(column) => {
                    tracing::debug!(key = %item.key, bucket = %column.bucket, "Already scheduled, not a backlog item");
                    false
                }
                None => true,
            }
        })
        .collect()
}

pub fn pack(ranked: &[WorkItem], slots: &[BucketSlot]) -> PackPlan {
    let mut plan = PackPlan::default();
    let mut pending: Vec<(&WorkItem, f64)> = Vec::with_capacity(ranked.len());

    for item in ranked {
        if !item.status.is_committed() {
            continue;
        }
        if item.bucket.is_some_and(|b| slots.iter().any(|s| s.bucket == b)) {
            continue;
        }
        match item.size {
            Some(size) if size >= 0.0 => pending.push((item, size)),
            _ => {
                tracing::warn!(key = %item.key, "Item has no usable size, not packed");
                plan.unsized_items.push(item.key.clone());
            }
        }
    }

    for slot in slots {
        let mut remaining = slot.remaining;
        pending.retain(|(item, size)| {
            if *size <= remaining + SIZE_EPSILON {
                remaining -= size;
                plan.assignments.push(Assignment {
                    key: item.key.clone(),
                    bucket: slot.bucket,
                    size: *size,
                });
                false
            } else {
                true
            }
        });
    }

    plan.unassigned = pending.into_iter().map(|(item, _)| item.key.clone()).collect();
    plan
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackOutcome {
    pub packed: usize,
    pub failed: Vec<ItemKey>,
}

/// Write the plan through the tracker. Failed writes are logged and skipped.
pub async fn apply(
    tracker: &dyn Tracker,
    plan: &PackPlan,
    active: BucketId,
    retry: &RetryPolicy,
) -> PackOutcome {
    let mut outcome = PackOutcome::default();
    for assignment in &plan.assignments {
        if assignment.bucket == active {
            tracing::error!(key = %assignment.key, "Refusing to pack into the active bucket");
            continue;
        }
        let result = with_retry(retry, "move_to_bucket", || {
            tracker.move_to_bucket(&assignment.key, assignment.bucket)
        })
        .await;
        match result {
            Ok(()) => {
                tracing::info!(key = %assignment.key, bucket = %assignment.bucket, size = assignment.size, "Packed");
                outcome.packed += 1;
            }
            Err(e) => {
                tracing::warn!(key = %assignment.key, error = %e, "Pack write failed");
                outcome.failed.push(assignment.key.clone());
            }
        }
    }
    outcome
}
