//! Overflow Rebalancer.
//!
//! An explicit state machine over the future buckets of the window:
//!
//! ```text
//! Scanning{from} --bucket i over capacity--> Overflowing{i}
//! Overflowing{i} --moves done------------> Scanning{from: i + 1}
//! Scanning{from} --no bucket over--------> pass complete
//! ```
//!
//! An overflowing bucket sheds its lowest-priority committed members to the
//! next bucket until it fits or a single committed member remains. The last
//! bucket of the window never sheds; its overflow waits for the window to
//! advance. Passes repeat until stable, until a pass moves nothing, or until
//! the pass limit.

use std::collections::HashSet;

use serde::Serialize;

use sprintline_common::{BucketId, ItemKey, WorkItem};

use super::SIZE_EPSILON;
use super::priority::RankContext;
use crate::tracker::{RetryPolicy, Tracker, with_retry};

/// Current members of one future bucket.
#[derive(Debug, Clone)]
pub struct BucketLoad {
    pub bucket: BucketId,
    pub members: Vec<WorkItem>,
}

impl BucketLoad {
    pub fn committed(&self) -> f64 {
        self.members.iter().map(WorkItem::committed_size).sum()
    }

    fn committed_count(&self) -> usize {
        self.members.iter().filter(|m| m.status.is_committed()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceState {
    Scanning { from: usize },
    Overflowing { index: usize },
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceOutcome {
    /// Every bucket fits, or holds a single oversized item.
    Stable,
    /// Overflow remains that this cycle cannot resolve: at the window's last
    /// bucket, or behind failed moves.
    Residual,
    /// The pass limit stopped the cascade.
    PassLimit,
}

/// Why a bucket is still over capacity after the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowReason {
    SingleOversizedItem,
    WindowBoundary,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overflow {
    pub bucket: BucketId,
    pub committed: f64,
    pub reason: OverflowReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Move {
    pub key: ItemKey,
    pub from: BucketId,
    pub to: BucketId,
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceReport {
    pub moves: Vec<Move>,
    pub failed_moves: Vec<ItemKey>,
    pub passes: u32,
    pub outcome: RebalanceOutcome,
    pub residual: Vec<Overflow>,
}

impl RebalanceReport {
    /// Overflow that should be reported rather than tolerated.
    pub fn violations(&self) -> impl Iterator<Item = &Overflow> {
        self.residual
            .iter()
            .filter(|o| o.reason != OverflowReason::SingleOversizedItem)
    }
}

pub struct Rebalancer {
    capacity: f64,
    pass_limit: u32,
}

impl Rebalancer {
    pub fn new(capacity: f64, pass_limit: u32) -> Self {
        Self {
            capacity,
            pass_limit,
        }
    }

    fn overflowing(&self, load: &BucketLoad) -> bool {
        load.committed() > self.capacity + SIZE_EPSILON
    }

    /// Index of the next bucket at or after `from` that can still shed.
    fn next_overflow(&self, loads: &[BucketLoad], from: usize, pinned: &HashSet<ItemKey>) -> Option<usize> {
        let last = loads.len().checked_sub(1)?;
        (from..last).find(|&i| {
            let load = &loads[i];
            self.overflowing(load)
                && load.committed_count() > 1
                && load
                    .members
                    .iter()
                    .any(|m| m.status.is_committed() && !pinned.contains(&m.key))
        })
    }

    /// Cascade overflow through `loads` (future buckets in ordinal order).
    ///
    /// Each move is written through the tracker before the local view changes,
    /// so a failed write leaves the item where it is.
    pub async fn run(
        &self,
        tracker: &dyn Tracker,
        mut loads: Vec<BucketLoad>,
        ctx: &RankContext,
        retry: &RetryPolicy,
    ) -> RebalanceReport {
        let mut moves = Vec::new();
        let mut failed = Vec::new();
        let mut pinned: HashSet<ItemKey> = HashSet::new();
        let mut passes = 0;
        let mut hit_limit = false;

        loop {
            if self.next_overflow(&loads, 0, &pinned).is_none() {
                break;
            }
            if passes == self.pass_limit {
                hit_limit = true;
                break;
            }
            passes += 1;
            let moved_before = moves.len();
            let mut state = RebalanceState::Scanning { from: 0 };

            while state != RebalanceState::Done {
                state = match state {
                    RebalanceState::Scanning { from } => match self.next_overflow(&loads, from, &pinned) {
                        Some(index) => RebalanceState::Overflowing { index },
                        None => RebalanceState::Done,
                    },
                    RebalanceState::Overflowing { index } => {
                        self.shed(tracker, &mut loads, index, ctx, retry, &mut pinned, &mut moves, &mut failed)
                            .await;
                        RebalanceState::Scanning { from: index + 1 }
                    }
                    RebalanceState::Done => RebalanceState::Done,
                };
            }

            tracing::debug!(pass = passes, moves = moves.len() - moved_before, "Rebalance pass complete");
            if moves.len() == moved_before {
                break;
            }
        }

        let residual = self.residual(&loads);
        let outcome = if hit_limit {
            RebalanceOutcome::PassLimit
        } else if residual
            .iter()
            .all(|o| o.reason == OverflowReason::SingleOversizedItem)
        {
            RebalanceOutcome::Stable
        } else {
            RebalanceOutcome::Residual
        };

        RebalanceReport {
            moves,
            failed_moves: failed,
            passes,
            outcome,
            residual,
        }
    }

    /// Move lowest-priority members of `loads[index]` to the next bucket
    /// until it fits or one committed member is left.
    #[allow(clippy::too_many_arguments)]
    async fn shed(
        &self,
        tracker: &dyn Tracker,
        loads: &mut [BucketLoad],
        index: usize,
        ctx: &RankContext,
        retry: &RetryPolicy,
        pinned: &mut HashSet<ItemKey>,
        moves: &mut Vec<Move>,
        failed: &mut Vec<ItemKey>,
    ) {
        let from = loads[index].bucket;
        let to = loads[index + 1].bucket;

        // Lowest priority first.
        let mut candidates: Vec<WorkItem> = loads[index]
            .members
            .iter()
            .filter(|m| m.status.is_committed() && !pinned.contains(&m.key))
            .cloned()
            .collect();
        candidates.sort_by_cached_key(|m| std::cmp::Reverse(ctx.rank(m)));

        for candidate in candidates {
            if !self.overflowing(&loads[index]) || loads[index].committed_count() <= 1 {
                break;
            }
            let size = candidate.committed_size();
            let result = with_retry(retry, "move_to_bucket", || tracker.move_to_bucket(&candidate.key, to)).await;
            match result {
                Ok(()) => {
                    tracing::info!(key = %candidate.key, from = %from, to = %to, size, "Moved overflow");
                    loads[index].members.retain(|m| m.key != candidate.key);
                    let mut moved = candidate.clone();
                    moved.bucket = Some(to);
                    // Shed lowest first, so inserting at the head keeps rank order.
                    loads[index + 1].members.insert(0, moved);
                    moves.push(Move {
                        key: candidate.key,
                        from,
                        to,
                        size,
                    });
                }
                Err(e) => {
                    tracing::warn!(key = %candidate.key, error = %e, "Overflow move failed, leaving item in place");
                    pinned.insert(candidate.key.clone());
                    failed.push(candidate.key);
                }
            }
        }
    }

    fn residual(&self, loads: &[BucketLoad]) -> Vec<Overflow> {
        let last = loads.len().saturating_sub(1);
        loads
            .iter()
            .enumerate()
            .filter(|(_, load)| self.overflowing(load))
            .map(|(i, load)| {
                let reason = if load.committed_count() <= 1 {
                    OverflowReason::SingleOversizedItem
                } else if i == last {
                    OverflowReason::WindowBoundary
                } else {
                    OverflowReason::Blocked
                };
                Overflow {
                    bucket: load.bucket,
                    committed: load.committed(),
                    reason,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{board, in_bucket};
    use crate::tracker::InMemoryTracker;
    use crate::tracker::memory::{BoardFixture, InjectedFailure, Mutation};
    use proptest::prelude::*;
    use sprintline_common::{ItemStatus, Priority};

    /// Tracker holding an active bucket (1) and `future` future buckets (2..).
    fn tracker(future: u64, items: Vec<WorkItem>) -> InMemoryTracker {
        let (active, upcoming) = board(future);
        let mut buckets = vec![active];
        buckets.extend(upcoming);
        InMemoryTracker::from_fixture(BoardFixture {
            buckets,
            items,
            ..Default::default()
        })
    }

    fn loads_from(items: &[WorkItem], buckets: &[u64]) -> Vec<BucketLoad> {
        buckets
            .iter()
            .map(|&b| BucketLoad {
                bucket: BucketId(b),
                members: items
                    .iter()
                    .filter(|i| i.bucket == Some(BucketId(b)))
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    fn ranked(key: &str, size: f64, bucket: u64, priority: Priority) -> WorkItem {
        WorkItem {
            priority: Some(priority),
            ..in_bucket(key, size, bucket)
        }
    }

    fn cascade_items() -> Vec<WorkItem> {
        vec![
            ranked("AX-1", 15.0, 2, Priority::Highest),
            ranked("AX-2", 15.0, 2, Priority::High),
            ranked("AX-3", 15.0, 2, Priority::Medium),
            ranked("AX-4", 15.0, 2, Priority::Low),
        ]
    }

    #[tokio::test]
    async fn cascade_moves_lowest_priority_members_forward() {
        let items = cascade_items();
        let tracker = tracker(2, items.clone());
        let report = Rebalancer::new(40.0, 8)
            .run(&tracker, loads_from(&items, &[2, 3]), &RankContext::default(), &RetryPolicy::immediate(1))
            .await;

        let moved: Vec<&str> = report.moves.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(moved, vec!["AX-4", "AX-3"]);
        assert_eq!(report.outcome, RebalanceOutcome::Stable);

        let snapshot = tracker.snapshot();
        let members_of = |b: u64| -> Vec<String> {
            snapshot
                .items
                .iter()
                .filter(|i| i.bucket == Some(BucketId(b)))
                .map(|i| i.key.to_string())
                .collect()
        };
        assert_eq!(members_of(2), vec!["AX-1", "AX-2"]);
        assert_eq!(members_of(3), vec!["AX-3", "AX-4"]);
        let committed = super::super::committed_by_bucket(&snapshot.items);
        assert_eq!(committed.get(&BucketId(2)).copied(), Some(30.0));
        assert_eq!(committed.get(&BucketId(3)).copied(), Some(30.0));
    }

    #[tokio::test]
    async fn shed_members_keep_rank_order_ahead_of_the_next_bucket() {
        let mut items = cascade_items();
        items.push(ranked("AX-7", 5.0, 3, Priority::Highest));
        let tracker = tracker(2, items.clone());
        let mut loads = loads_from(&items, &[2, 3]);
        let ctx = RankContext::default();
        let retry = RetryPolicy::immediate(1);
        let rebalancer = Rebalancer::new(40.0, 8);
        let (mut pinned, mut moves, mut failed) = (HashSet::new(), Vec::new(), Vec::new());
        rebalancer
            .shed(&tracker, &mut loads, 0, &ctx, &retry, &mut pinned, &mut moves, &mut failed)
            .await;

        let next: Vec<&str> = loads[1].members.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(next, vec!["AX-3", "AX-4", "AX-7"]);
        assert!(loads[1].members.iter().all(|m| m.bucket == Some(BucketId(3))));
    }

    #[tokio::test]
    async fn overflow_cascades_into_following_buckets() {
        let mut items = cascade_items();
        items.push(ranked("AX-5", 30.0, 3, Priority::Highest));
        let tracker = tracker(3, items.clone());
        let report = Rebalancer::new(40.0, 8)
            .run(&tracker, loads_from(&items, &[2, 3, 4]), &RankContext::default(), &RetryPolicy::immediate(1))
            .await;
        // Bucket 3 receives 30 and now holds 60, so it sheds its own lowest.
        assert_eq!(report.outcome, RebalanceOutcome::Stable);
        let snapshot = tracker.snapshot();
        let committed = super::super::committed_by_bucket(&snapshot.items);
        for (_, total) in committed.iter().filter(|(b, _)| b.0 != 1) {
            assert!(*total <= 40.0);
        }
        assert_eq!(tracker.item("AX-5").unwrap().bucket, Some(BucketId(3)));
    }

    #[tokio::test]
    async fn stable_buckets_produce_no_moves() {
        let items = vec![in_bucket("AX-1", 20.0, 2), in_bucket("AX-2", 20.0, 2)];
        let tracker = tracker(2, items.clone());
        let report = Rebalancer::new(40.0, 8)
            .run(&tracker, loads_from(&items, &[2, 3]), &RankContext::default(), &RetryPolicy::immediate(1))
            .await;
        assert!(report.moves.is_empty());
        assert_eq!(report.passes, 0);
        assert_eq!(report.outcome, RebalanceOutcome::Stable);
        assert!(tracker.mutations().is_empty());
    }

    #[tokio::test]
    async fn single_oversized_item_stays_put() {
        let items = vec![in_bucket("AX-1", 55.0, 2)];
        let tracker = tracker(2, items.clone());
        let report = Rebalancer::new(40.0, 8)
            .run(&tracker, loads_from(&items, &[2, 3]), &RankContext::default(), &RetryPolicy::immediate(1))
            .await;
        assert!(report.moves.is_empty());
        assert_eq!(report.outcome, RebalanceOutcome::Stable);
        assert_eq!(report.residual[0].reason, OverflowReason::SingleOversizedItem);
        assert_eq!(report.violations().count(), 0);
    }

    #[tokio::test]
    async fn last_bucket_overflow_is_left_for_next_cycle() {
        let items = vec![in_bucket("AX-1", 30.0, 3), in_bucket("AX-2", 30.0, 3)];
        let tracker = tracker(2, items.clone());
        let report = Rebalancer::new(40.0, 8)
            .run(&tracker, loads_from(&items, &[2, 3]), &RankContext::default(), &RetryPolicy::immediate(1))
            .await;
        assert!(report.moves.is_empty());
        assert_eq!(report.outcome, RebalanceOutcome::Residual);
        assert_eq!(report.residual[0].reason, OverflowReason::WindowBoundary);
    }

    #[tokio::test]
    async fn failed_move_leaves_item_and_tries_next_candidate() {
        let items = cascade_items();
        let tracker = tracker(2, items.clone());
        tracker.fail_writes(&ItemKey::from("AX-4"), InjectedFailure::Permanent, 5);
        let report = Rebalancer::new(40.0, 8)
            .run(&tracker, loads_from(&items, &[2, 3]), &RankContext::default(), &RetryPolicy::immediate(1))
            .await;
        assert_eq!(report.failed_moves, vec![ItemKey::from("AX-4")]);
        let moved: Vec<&str> = report.moves.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(moved, vec!["AX-3", "AX-2"]);
        assert_eq!(tracker.item("AX-4").unwrap().bucket, Some(BucketId(2)));
        assert_eq!(report.outcome, RebalanceOutcome::Stable);
    }

    #[tokio::test]
    async fn uncommitted_members_are_never_moved() {
        let mut items = cascade_items();
        items.push(WorkItem {
            status: ItemStatus::InProgress,
            ..ranked("AX-9", 15.0, 2, Priority::Lowest)
        });
        let tracker = tracker(2, items.clone());
        let report = Rebalancer::new(40.0, 8)
            .run(&tracker, loads_from(&items, &[2, 3]), &RankContext::default(), &RetryPolicy::immediate(1))
            .await;
        assert!(report.moves.iter().all(|m| m.key.as_str() != "AX-9"));
        assert_eq!(tracker.item("AX-9").unwrap().bucket, Some(BucketId(2)));
    }

    #[tokio::test]
    async fn zero_pass_limit_stops_before_moving() {
        let items = cascade_items();
        let tracker = tracker(2, items.clone());
        let report = Rebalancer::new(40.0, 0)
            .run(&tracker, loads_from(&items, &[2, 3]), &RankContext::default(), &RetryPolicy::immediate(1))
            .await;
        assert_eq!(report.outcome, RebalanceOutcome::PassLimit);
        assert!(report.moves.is_empty());
        assert!(report.violations().count() > 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn capacity_holds_after_stable_run(
            sizes in proptest::collection::vec((1u8..=40, 0usize..3), 1..20)
        ) {
            let items: Vec<WorkItem> = sizes
                .iter()
                .enumerate()
                .map(|(n, (size, bucket))| in_bucket(&format!("AX-{}", n + 1), *size as f64, 2 + *bucket as u64))
                .collect();
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let tracker = tracker(3, items.clone());
            let report = rt.block_on(
                Rebalancer::new(40.0, 16).run(
                    &tracker,
                    loads_from(&items, &[2, 3, 4]),
                    &RankContext::default(),
                    &RetryPolicy::immediate(1),
                ),
            );
            for (bucket, total) in super::super::committed_by_bucket(&tracker.snapshot().items) {
                let members = tracker.snapshot().items.iter().filter(|i| i.bucket == Some(bucket)).count();
                if bucket.0 != 4 || report.outcome == RebalanceOutcome::Stable {
                    prop_assert!(total <= 40.0 || members == 1);
                }
            }
            let touched_active = tracker
                .mutations()
                .iter()
                .any(|m| matches!(m, Mutation::MoveToBucket { bucket, .. } if bucket.0 == 1));
            prop_assert!(!touched_active, "a move targeted the active bucket");
        }
    }
}
