//! Allocation and synchronization engine.
//!
//! Every stage is a reconciliation: observe the tracker, compute a plan with
//! pure functions, then write only the differences.
//!
//! | Module      | Responsibility                                              |
//! |-------------|-------------------------------------------------------------|
//! | `priority`  | `OrderKey` total order over work items and ideas            |
//! | `packer`    | First-fit packing of ranked backlog into future buckets     |
//! | `rebalance` | Overflow cascade state machine                              |
//! | `window`    | Column binding, sprint runway, sprint lifecycle, columns    |
//! | `roadmap`   | Idea placement into columns and promotion to epics          |
//! | `ordering`  | Minimal `rank_before` sequences for bucket and backlog order|
//! | `sync`      | Idea columns mirrored from epic bucket placement            |
//! | `align`     | Secondary ideas matched onto primaries                      |

pub mod align;
pub mod ordering;
pub mod packer;
pub mod priority;
pub mod rebalance;
pub mod roadmap;
pub mod sync;
pub mod window;

use std::collections::HashMap;

use sprintline_common::{BucketId, WorkItem};

/// Sizes within this distance count as equal when comparing against capacity.
pub(crate) const SIZE_EPSILON: f64 = 1e-9;

/// Committed size per bucket.
pub fn committed_by_bucket(items: &[WorkItem]) -> HashMap<BucketId, f64> {
    let mut totals = HashMap::new();
    for item in items {
        if let Some(bucket) = item.bucket {
            *totals.entry(bucket).or_insert(0.0) += item.committed_size();
        }
    }
    totals
}
