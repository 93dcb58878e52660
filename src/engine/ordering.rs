//! Ordering stage.
//!
//! Brings the tracker's rank order of each window bucket and of the
//! unscheduled backlog in line with resolver order, using as few
//! `rank_before` calls as the bottom-up walk needs.

use serde::Serialize;

use sprintline_common::{ItemKey, ItemStatus, WorkItem};

use super::priority::{RankContext, rank_items};
use super::window::ColumnWindow;
use crate::errors::CycleError;
use crate::tracker::{ItemFilter, RetryPolicy, Tracker, with_retry};

/// A single `rank_before(key, before)` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankMove {
    pub key: ItemKey,
    pub before: ItemKey,
}

/// Moves that turn `current` into `desired` (same keys, any order).
///
/// Walks `desired` from the bottom: whenever an item is not already directly
/// above its successor it is ranked before it. Returns nothing when the two
/// orders agree.
pub fn rank_moves(current: &[ItemKey], desired: &[ItemKey]) -> Vec<RankMove> {
    let mut simulated: Vec<&ItemKey> = current.iter().collect();
    let mut moves = Vec::new();
    for pair in desired.windows(2).rev() {
        let (key, before) = (&pair[0], &pair[1]);
        let (Some(from), Some(target)) = (
            simulated.iter().position(|k| *k == key),
            simulated.iter().position(|k| *k == before),
        ) else {
            continue;
        };
        if from + 1 == target {
            continue;
        }
        let moved = simulated.remove(from);
        let target = if from < target { target - 1 } else { target };
        simulated.insert(target, moved);
        moves.push(RankMove {
            key: key.clone(),
            before: before.clone(),
        });
    }
    moves
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderReport {
    /// Groups (buckets plus the backlog) that needed reordering.
    pub groups: usize,
    pub moves: usize,
    pub failed: Vec<ItemKey>,
}

async fn reorder(
    tracker: &dyn Tracker,
    mut items: Vec<WorkItem>,
    ctx: &RankContext,
    retry: &RetryPolicy,
    report: &mut OrderReport,
) {
    let current: Vec<ItemKey> = items.iter().map(|i| i.key.clone()).collect();
    rank_items(&mut items, ctx);
    let desired: Vec<ItemKey> = items.into_iter().map(|i| i.key).collect();
    let moves = rank_moves(&current, &desired);
    if moves.is_empty() {
        return;
    }
    report.groups += 1;
    for RankMove { key, before } in moves {
        match with_retry(retry, "rank_before", || tracker.rank_before(&key, &before)).await {
            Ok(()) => report.moves += 1,
            Err(e) => {
                tracing::warn!(%key, %before, error = %e, "Rank write failed");
                report.failed.push(key);
            }
        }
    }
}

/// Order stage. `ctx` must reflect the cycle's final idea columns.
pub async fn order(
    tracker: &dyn Tracker,
    window: &ColumnWindow,
    ctx: &RankContext,
    backlog_assignee: Option<&str>,
    retry: &RetryPolicy,
) -> Result<OrderReport, CycleError> {
    let mut report = OrderReport::default();
    for column in window.columns() {
        let filter = ItemFilter::InBucket(column.bucket);
        let members = with_retry(retry, "query_items", || tracker.query_items(&filter))
            .await
            .map_err(|source| CycleError::Observe { stage: "order", source })?;
        reorder(tracker, members, ctx, retry, &mut report).await;
    }

    let backlog = ItemFilter::Unscheduled {
        statuses: vec![ItemStatus::Backlog, ItemStatus::Ready],
        assignee: backlog_assignee.map(str::to_string),
    };
    let items = with_retry(retry, "query_items", || tracker.query_items(&backlog))
        .await
        .map_err(|source| CycleError::Observe { stage: "order", source })?
        .into_iter()
        .filter(|item| item.bucket.and_then(|b| window.column_for(b)).is_none())
        .collect();
    reorder(tracker, items, ctx, retry, &mut report).await;

    if report.moves > 0 {
        tracing::info!(groups = report.groups, moves = report.moves, "Reordered");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{board, in_bucket, item};
    use crate::tracker::InMemoryTracker;
    use crate::tracker::memory::BoardFixture;
    use proptest::prelude::*;
    use sprintline_common::{BucketId, Priority};

    fn keys(names: &[&str]) -> Vec<ItemKey> {
        names.iter().map(|n| ItemKey::from(*n)).collect()
    }

    fn apply(current: &[ItemKey], moves: &[RankMove]) -> Vec<ItemKey> {
        let mut order = current.to_vec();
        for m in moves {
            let from = order.iter().position(|k| *k == m.key).unwrap();
            let moved = order.remove(from);
            let to = order.iter().position(|k| *k == m.before).unwrap();
            order.insert(to, moved);
        }
        order
    }

    #[test]
    fn ordered_input_needs_no_moves() {
        let order = keys(&["AX-1", "AX-2", "AX-3"]);
        assert!(rank_moves(&order, &order).is_empty());
    }

    #[test]
    fn single_displaced_item_takes_one_move() {
        let current = keys(&["AX-2", "AX-3", "AX-1"]);
        let desired = keys(&["AX-1", "AX-2", "AX-3"]);
        let moves = rank_moves(&current, &desired);
        assert_eq!(
            moves,
            vec![RankMove {
                key: "AX-1".into(),
                before: "AX-2".into()
            }]
        );
    }

    #[test]
    fn reversed_order_is_rebuilt_bottom_up() {
        let current = keys(&["AX-4", "AX-3", "AX-2", "AX-1"]);
        let desired = keys(&["AX-1", "AX-2", "AX-3", "AX-4"]);
        let moves = rank_moves(&current, &desired);
        assert_eq!(moves.len(), 3);
        assert_eq!(moves[0].before.as_str(), "AX-4");
        assert_eq!(apply(&current, &moves), desired);
    }

    proptest! {
        #[test]
        fn moves_always_reach_the_desired_order(
            perm in Just((1..=12).collect::<Vec<u32>>()).prop_shuffle()
        ) {
            let desired: Vec<ItemKey> = (1..=12).map(|n| ItemKey::new(format!("AX-{}", n))).collect();
            let current: Vec<ItemKey> = perm.iter().map(|n| ItemKey::new(format!("AX-{}", n))).collect();
            let moves = rank_moves(&current, &desired);
            prop_assert!(moves.len() < desired.len());
            prop_assert_eq!(apply(&current, &moves), desired);
        }
    }

    #[tokio::test]
    async fn order_stage_ranks_buckets_and_backlog_then_settles() {
        let (active, future) = board(1);
        let window = ColumnWindow::bind(&active, &future, 2);
        let urgent = WorkItem {
            priority: Some(Priority::Highest),
            ..in_bucket("AX-3", 2.0, 1)
        };
        let tracker = InMemoryTracker::from_fixture(BoardFixture {
            buckets: vec![active, future[0].clone()],
            items: vec![
                in_bucket("AX-1", 2.0, 1),
                item("AX-8", 1.0),
                urgent,
                item("AX-7", 1.0),
            ],
            ..Default::default()
        });
        let retry = RetryPolicy::immediate(1);
        let ctx = RankContext::default();

        let report = order(&tracker, &window, &ctx, None, &retry).await.unwrap();
        assert_eq!(report.groups, 2);
        assert_eq!(report.moves, 2);
        let in_active = tracker.query_items(&ItemFilter::InBucket(BucketId(1))).await.unwrap();
        assert_eq!(in_active[0].key.as_str(), "AX-3");

        tracker.clear_mutations();
        let again = order(&tracker, &window, &ctx, None, &retry).await.unwrap();
        assert_eq!(again.moves, 0);
        assert!(tracker.mutations().is_empty());
    }
}
