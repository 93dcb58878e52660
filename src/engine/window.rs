//! Column Window Manager.
//!
//! Column 0 is bound to the active bucket and columns 1..W-1 to the next
//! future buckets by start date. The binding is derived from the tracker's
//! buckets on every cycle and never stored. Column labels come from each
//! bucket's calendar period, so the same bucket always yields the same label.

use std::sync::LazyLock;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use regex::Regex;
use serde::Serialize;

use sprintline_common::{Bucket, BucketDraft, BucketId, BucketState, ItemKey};

use crate::errors::CycleError;
use crate::tracker::{ItemFilter, RetryPolicy, Tracker, with_retry};

/// Bucket names written by the runway: `dd/mm/YYYY - dd/mm/YYYY`.
static PERIOD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})\s*-\s*(\d{1,2})/(\d{1,2})/(\d{4})").unwrap()
});

fn ymd(day: &str, month: &str, year: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Period encoded in a bucket name, if it has the runway shape.
pub fn parse_period(name: &str) -> Option<(NaiveDate, NaiveDate)> {
    let caps = PERIOD_NAME.captures(name)?;
    let start = ymd(&caps[1], &caps[2], &caps[3])?;
    let end = ymd(&caps[4], &caps[5], &caps[6])?;
    Some((start, end))
}

pub fn bucket_start(bucket: &Bucket) -> Option<NaiveDate> {
    bucket
        .start
        .or_else(|| parse_period(&bucket.name).map(|(start, _)| start))
}

pub fn bucket_end(bucket: &Bucket) -> Option<NaiveDate> {
    bucket
        .end
        .or_else(|| parse_period(&bucket.name).map(|(_, end)| end))
}

/// Column label for a bucket starting on `start`, e.g. `27 Oct 2026`.
pub fn column_label(start: NaiveDate) -> String {
    start.format("%d %b %Y").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub ordinal: usize,
    pub label: String,
    pub bucket: BucketId,
}

/// Binding of column ordinals to buckets for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnWindow {
    columns: Vec<Column>,
}

impl ColumnWindow {
    /// Bind `active` and up to `width - 1` of `future` (any order).
    ///
    /// Future buckets without a resolvable start date are skipped. The active
    /// bucket falls back to its name as label.
    pub fn bind(active: &Bucket, future: &[Bucket], width: usize) -> Self {
        let mut columns = vec![Column {
            ordinal: 0,
            label: bucket_start(active)
                .map(column_label)
                .unwrap_or_else(|| active.name.clone()),
            bucket: active.id,
        }];

        let mut dated: Vec<(NaiveDate, &Bucket)> = Vec::with_capacity(future.len());
        for bucket in future {
            match bucket_start(bucket) {
                Some(start) => dated.push((start, bucket)),
                None => tracing::warn!(bucket = %bucket.id, name = %bucket.name, "Bucket has no start date, left out of the window"),
            }
        }
        dated.sort_by_key(|(start, bucket)| (*start, bucket.id));

        for (start, bucket) in dated {
            if columns.len() >= width {
                break;
            }
            let label = column_label(start);
            if columns.iter().any(|c| c.label == label) {
                tracing::warn!(bucket = %bucket.id, %label, "Two buckets share a start date, keeping the first");
                continue;
            }
            columns.push(Column {
                ordinal: columns.len(),
                label,
                bucket: bucket.id,
            });
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn active(&self) -> &Column {
        &self.columns[0]
    }

    /// Columns 1..W-1.
    pub fn future(&self) -> &[Column] {
        &self.columns[1..]
    }

    pub fn labels(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.label.clone()).collect()
    }

    pub fn column_for(&self, bucket: BucketId) -> Option<&Column> {
        self.columns.iter().find(|c| c.bucket == bucket)
    }

    pub fn ordinal_of(&self, label: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.label == label)
    }

    /// The remote roadmap still shows an older bucket in column 0.
    pub fn advanced(&self, remote: &[String]) -> bool {
        remote
            .first()
            .is_some_and(|first| *first != self.active().label)
    }
}

/// First `weekday` strictly after `after`.
pub fn next_weekday_after(after: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (weekday.num_days_from_monday() + 7 - after.weekday().num_days_from_monday()) % 7;
    let ahead = if ahead == 0 { 7 } else { ahead };
    after + Days::new(u64::from(ahead))
}

/// Drafts needed so that at least `wanted` future buckets exist.
///
/// Each new bucket starts on the first cadence weekday after the latest known
/// end date (today when nothing is dated) and lasts `length_days` days.
pub fn runway_drafts(
    known: &[&Bucket],
    future_count: usize,
    wanted: usize,
    weekday: Weekday,
    length_days: i64,
    today: NaiveDate,
) -> Vec<BucketDraft> {
    let missing = wanted.saturating_sub(future_count);
    let mut last_end = known
        .iter()
        .filter_map(|b| bucket_end(b))
        .max()
        .unwrap_or(today);
    let span = Days::new(length_days.max(1) as u64 - 1);
    (0..missing)
        .map(|_| {
            let start = next_weekday_after(last_end, weekday);
            let end = start + span;
            last_end = end;
            BucketDraft::for_period(start, end)
        })
        .collect()
}

/// The active bucket's period is over.
pub fn lifecycle_due(active: &Bucket, today: NaiveDate) -> bool {
    bucket_end(active).is_some_and(|end| end <= today)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnChanges {
    pub retired: Vec<String>,
    pub added: Vec<String>,
}

impl ColumnChanges {
    pub fn is_empty(&self) -> bool {
        self.retired.is_empty() && self.added.is_empty()
    }
}

/// Remote columns to retire and window labels to insert, in window order.
pub fn plan_columns(window: &ColumnWindow, remote: &[String]) -> ColumnChanges {
    let labels = window.labels();
    ColumnChanges {
        retired: remote
            .iter()
            .filter(|r| !labels.contains(r))
            .cloned()
            .collect(),
        added: labels
            .into_iter()
            .filter(|l| !remote.contains(l))
            .collect(),
    }
}

/// Column a missing `label` goes after: the nearest earlier window label
/// already on the roadmap. `None` means it goes first.
pub fn column_anchor(labels: &[String], present: &[String], label: &str) -> Option<String> {
    let position = labels.iter().position(|l| l == label)?;
    labels[..position]
        .iter()
        .rev()
        .find(|l| present.contains(l))
        .cloned()
}

/// Apply [`plan_columns`]; only successful writes are reported.
pub async fn reconcile_columns(
    tracker: &dyn Tracker,
    window: &ColumnWindow,
    remote: &[String],
    retry: &RetryPolicy,
) -> ColumnChanges {
    let plan = plan_columns(window, remote);
    let mut done = ColumnChanges::default();
    for label in plan.retired {
        match with_retry(retry, "retire_roadmap_column", || tracker.retire_roadmap_column(&label)).await {
            Ok(()) => {
                tracing::info!(%label, "Retired roadmap column");
                done.retired.push(label);
            }
            Err(e) => tracing::warn!(%label, error = %e, "Could not retire roadmap column"),
        }
    }
    let labels = window.labels();
    let mut present: Vec<String> = remote
        .iter()
        .filter(|r| !done.retired.contains(r))
        .cloned()
        .collect();
    for label in plan.added {
        let after = column_anchor(&labels, &present, &label);
        let anchor = after.as_deref();
        match with_retry(retry, "add_roadmap_column", || tracker.add_roadmap_column(&label, anchor)).await {
            Ok(()) => {
                tracing::info!(%label, after = ?anchor, "Added roadmap column");
                let at = anchor
                    .and_then(|a| present.iter().position(|p| p == a))
                    .map_or(0, |i| i + 1);
                present.insert(at, label.clone());
                done.added.push(label);
            }
            Err(e) => tracing::warn!(%label, error = %e, "Could not add roadmap column"),
        }
    }
    done
}

#[derive(Debug, Clone)]
pub struct WindowSettings {
    pub width: usize,
    pub cadence: Weekday,
    pub length_days: i64,
    pub manage_lifecycle: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowReport {
    pub active: Option<BucketId>,
    pub advanced: bool,
    pub buckets_created: usize,
    pub closed: Option<BucketId>,
    pub started: Option<BucketId>,
    pub carried_over: usize,
    pub columns: ColumnChanges,
    pub errors: Vec<String>,
}

fn observe(stage: &'static str) -> impl FnOnce(crate::errors::TrackerError) -> CycleError {
    move |source| CycleError::Observe { stage, source }
}

/// Window stage: sprint lifecycle, runway, binding and roadmap columns.
pub async fn prepare(
    tracker: &dyn Tracker,
    settings: &WindowSettings,
    today: NaiveDate,
    retry: &RetryPolicy,
) -> Result<(ColumnWindow, WindowReport), CycleError> {
    let mut report = WindowReport::default();
    let mut active = with_retry(retry, "buckets", || tracker.buckets(BucketState::Active))
        .await
        .map_err(observe("window"))?
        .into_iter()
        .next();
    let mut future = with_retry(retry, "buckets", || tracker.buckets(BucketState::Future))
        .await
        .map_err(observe("window"))?;

    if settings.manage_lifecycle {
        if let Some(current) = active.clone()
            && lifecycle_due(&current, today)
        {
            if future.is_empty() {
                create_runway(tracker, settings, Some(&current), &mut future, 1, today, retry, &mut report).await;
            }
            if let Some(next) = future.first().cloned() {
                match advance(tracker, &current, &next, retry, &mut report).await {
                    Ok(()) => {
                        future.remove(0);
                        active = Some(Bucket {
                            state: BucketState::Active,
                            ..next
                        });
                    }
                    Err(e) => report.errors.push(e),
                }
            }
        } else if active.is_none() && !future.is_empty() {
            // A previous cycle closed the active bucket but never started the next.
            let next = future.remove(0);
            match with_retry(retry, "set_bucket_state", || tracker.set_bucket_state(next.id, BucketState::Active)).await {
                Ok(()) => {
                    tracing::info!(bucket = %next.id, "Started bucket");
                    report.started = Some(next.id);
                    active = Some(Bucket {
                        state: BucketState::Active,
                        ..next
                    });
                }
                Err(e) => {
                    report.errors.push(format!("start {}: {}", next.id, e));
                    future.insert(0, next);
                }
            }
        }
    }

    let active = active.ok_or(CycleError::NoActiveBucket)?;
    report.active = Some(active.id);

    let wanted = settings.width.saturating_sub(1);
    create_runway(tracker, settings, Some(&active), &mut future, wanted, today, retry, &mut report).await;

    let window = ColumnWindow::bind(&active, &future, settings.width);
    let remote = with_retry(retry, "roadmap_columns", || tracker.roadmap_columns())
        .await
        .map_err(observe("window"))?;
    report.advanced = window.advanced(&remote);
    if report.advanced {
        tracing::info!(from = %remote[0], to = %window.active().label, "Roadmap window advanced");
    }
    report.columns = reconcile_columns(tracker, &window, &remote, retry).await;
    Ok((window, report))
}

#[allow(clippy::too_many_arguments)]
async fn create_runway(
    tracker: &dyn Tracker,
    settings: &WindowSettings,
    active: Option<&Bucket>,
    future: &mut Vec<Bucket>,
    wanted: usize,
    today: NaiveDate,
    retry: &RetryPolicy,
    report: &mut WindowReport,
) {
    let known: Vec<&Bucket> = active.into_iter().chain(future.iter()).collect();
    let drafts = runway_drafts(
        &known,
        future.len(),
        wanted,
        settings.cadence,
        settings.length_days,
        today,
    );
    for draft in drafts {
        match with_retry(retry, "create_bucket", || tracker.create_bucket(&draft)).await {
            Ok(bucket) => {
                tracing::info!(bucket = %bucket.id, name = %bucket.name, "Created bucket");
                report.buckets_created += 1;
                future.push(bucket);
            }
            Err(e) => {
                tracing::warn!(name = %draft.name, error = %e, "Could not create bucket");
                report.errors.push(format!("create bucket {}: {}", draft.name, e));
                break;
            }
        }
    }
}

/// Carry incomplete items into `next`, close `current`, start `next`.
async fn advance(
    tracker: &dyn Tracker,
    current: &Bucket,
    next: &Bucket,
    retry: &RetryPolicy,
    report: &mut WindowReport,
) -> Result<(), String> {
    let filter = ItemFilter::InBucket(current.id);
    let members = with_retry(retry, "query_items", || tracker.query_items(&filter))
        .await
        .map_err(|e| format!("read bucket {}: {}", current.id, e))?;
    let carry: Vec<&ItemKey> = members
        .iter()
        .filter(|m| !m.status.is_done())
        .map(|m| &m.key)
        .collect();
    for key in carry {
        match with_retry(retry, "move_to_bucket", || tracker.move_to_bucket(key, next.id)).await {
            Ok(()) => report.carried_over += 1,
            Err(e) => tracing::warn!(%key, error = %e, "Could not carry item over"),
        }
    }

    with_retry(retry, "set_bucket_state", || tracker.set_bucket_state(current.id, BucketState::Closed))
        .await
        .map_err(|e| format!("close {}: {}", current.id, e))?;
    tracing::info!(bucket = %current.id, carried = report.carried_over, "Closed bucket");
    report.closed = Some(current.id);

    with_retry(retry, "set_bucket_state", || tracker.set_bucket_state(next.id, BucketState::Active))
        .await
        .map_err(|e| format!("start {}: {}", next.id, e))?;
    tracing::info!(bucket = %next.id, "Started bucket");
    report.started = Some(next.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{board, bucket, date, in_bucket};
    use crate::tracker::InMemoryTracker;
    use crate::tracker::memory::{BoardFixture, Mutation};
    use sprintline_common::{Idea, ItemStatus, WorkItem};

    fn settings(width: usize) -> WindowSettings {
        WindowSettings {
            width,
            cadence: Weekday::Tue,
            length_days: 14,
            manage_lifecycle: true,
        }
    }

    #[test]
    fn labels_come_from_start_dates_and_fall_back_to_names() {
        let (active, mut future) = board(2);
        future[1].start = None;
        let window = ColumnWindow::bind(&active, &future, 12);
        assert_eq!(window.labels(), vec!["13 Oct 2026", "27 Oct 2026", "10 Nov 2026"]);
    }

    #[test]
    fn undated_buckets_are_skipped_and_width_truncates() {
        let (active, mut future) = board(4);
        future.push(Bucket {
            id: BucketId(99),
            name: "Hardening".into(),
            start: None,
            end: None,
            state: BucketState::Future,
        });
        future.reverse();
        let window = ColumnWindow::bind(&active, &future, 3);
        assert_eq!(window.columns().len(), 3);
        assert_eq!(window.column_for(BucketId(2)).unwrap().ordinal, 1);
        assert_eq!(window.column_for(BucketId(3)).unwrap().ordinal, 2);
        assert!(window.column_for(BucketId(99)).is_none());
        assert_eq!(window.ordinal_of("27 Oct 2026"), Some(1));
    }

    #[test]
    fn advanced_compares_remote_first_column() {
        let (active, future) = board(2);
        let window = ColumnWindow::bind(&active, &future, 12);
        assert!(!window.advanced(&[]));
        assert!(!window.advanced(&["13 Oct 2026".into()]));
        assert!(window.advanced(&["29 Sep 2026".into(), "13 Oct 2026".into()]));
    }

    #[test]
    fn period_names_parse_day_first() {
        assert_eq!(
            parse_period("27/10/2026 - 09/11/2026"),
            Some((date(2026, 10, 27), date(2026, 11, 9)))
        );
        assert_eq!(parse_period("Sprint 12"), None);
        assert_eq!(parse_period("31/02/2026 - 01/03/2026"), None);
    }

    #[test]
    fn next_weekday_is_strictly_after() {
        assert_eq!(next_weekday_after(date(2026, 10, 26), Weekday::Tue), date(2026, 10, 27));
        assert_eq!(next_weekday_after(date(2026, 10, 27), Weekday::Tue), date(2026, 11, 3));
    }

    #[test]
    fn runway_continues_from_last_end() {
        let (active, future) = board(1);
        let known: Vec<&Bucket> = std::iter::once(&active).chain(future.iter()).collect();
        let drafts = runway_drafts(&known, future.len(), 3, Weekday::Tue, 14, date(2026, 10, 19));
        let names: Vec<&str> = drafts.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["10/11/2026 - 23/11/2026", "24/11/2026 - 07/12/2026"]);
    }

    #[test]
    fn runway_without_dates_starts_after_today() {
        let drafts = runway_drafts(&[], 0, 1, Weekday::Tue, 14, date(2026, 10, 19));
        assert_eq!(drafts[0].start, date(2026, 10, 20));
        assert_eq!(drafts[0].end, date(2026, 11, 2));
    }

    #[test]
    fn lifecycle_due_on_end_date() {
        let active = bucket(1, date(2026, 10, 13), BucketState::Active);
        assert!(!lifecycle_due(&active, date(2026, 10, 25)));
        assert!(lifecycle_due(&active, date(2026, 10, 26)));
    }

    #[test]
    fn column_plan_retires_stale_and_adds_missing() {
        let (active, future) = board(2);
        let window = ColumnWindow::bind(&active, &future, 12);
        let plan = plan_columns(&window, &["29 Sep 2026".into(), "13 Oct 2026".into()]);
        assert_eq!(plan.retired, vec!["29 Sep 2026"]);
        assert_eq!(plan.added, vec!["27 Oct 2026", "10 Nov 2026"]);
        assert!(plan_columns(&window, &window.labels()).is_empty());
    }

    #[test]
    fn missing_column_is_anchored_to_its_predecessor() {
        let labels: Vec<String> = ["13 Oct 2026", "27 Oct 2026", "10 Nov 2026"].map(String::from).to_vec();
        let present: Vec<String> = vec!["13 Oct 2026".into(), "10 Nov 2026".into()];
        assert_eq!(column_anchor(&labels, &present, "27 Oct 2026").as_deref(), Some("13 Oct 2026"));
        assert_eq!(column_anchor(&labels, &[], "27 Oct 2026"), None);
        assert_eq!(column_anchor(&labels, &present, "13 Oct 2026"), None);
    }

    #[tokio::test]
    async fn missing_middle_column_is_inserted_in_bucket_order() {
        let (active, future) = board(2);
        let window = ColumnWindow::bind(&active, &future, 3);
        let labels = window.labels();
        let remote = vec![labels[0].clone(), labels[2].clone()];
        let tracker = InMemoryTracker::from_fixture(BoardFixture {
            columns: remote.clone(),
            ..Default::default()
        });

        let changes = reconcile_columns(&tracker, &window, &remote, &RetryPolicy::immediate(1)).await;
        assert_eq!(changes.added, vec![labels[1].clone()]);
        assert_eq!(tracker.roadmap_columns().await.unwrap(), labels);
        assert_eq!(
            tracker.mutations(),
            vec![Mutation::AddColumn {
                label: labels[1].clone(),
                after: Some(labels[0].clone()),
            }]
        );
    }

    fn tracker(buckets: Vec<Bucket>, items: Vec<WorkItem>, columns: Vec<String>) -> InMemoryTracker {
        InMemoryTracker::from_fixture(BoardFixture {
            buckets,
            items,
            columns,
            ideas: vec![Idea {
                column: Some("29 Sep 2026".into()),
                ..crate::engine::fixtures::idea("RM-1", Some(3))
            }],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn prepare_builds_runway_and_columns_then_is_idempotent() {
        let (active, future) = board(1);
        let mut buckets = vec![active];
        buckets.extend(future);
        let tracker = tracker(buckets, vec![], vec!["29 Sep 2026".into()]);
        let retry = RetryPolicy::immediate(1);

        let (window, report) = prepare(&tracker, &settings(4), date(2026, 10, 19), &retry).await.unwrap();
        assert_eq!(report.buckets_created, 2);
        assert!(report.advanced);
        assert_eq!(report.columns.retired, vec!["29 Sep 2026"]);
        assert_eq!(window.labels().len(), 4);
        assert_eq!(tracker.roadmap_columns().await.unwrap(), window.labels());
        assert_eq!(tracker.idea("RM-1").unwrap().column, None);

        tracker.clear_mutations();
        let (again, report) = prepare(&tracker, &settings(4), date(2026, 10, 19), &retry).await.unwrap();
        assert_eq!(again, window);
        assert_eq!(report.buckets_created, 0);
        assert!(tracker.mutations().is_empty());
    }

    #[tokio::test]
    async fn ended_active_bucket_rolls_over() {
        let (active, future) = board(2);
        let mut buckets = vec![active];
        buckets.extend(future);
        let done = WorkItem {
            status: ItemStatus::Done,
            ..in_bucket("AX-1", 3.0, 1)
        };
        let open = in_bucket("AX-2", 5.0, 1);
        let tracker = tracker(buckets, vec![done, open], vec![]);

        let (window, report) = prepare(&tracker, &settings(3), date(2026, 10, 27), &RetryPolicy::immediate(1))
            .await
            .unwrap();
        assert_eq!(report.closed, Some(BucketId(1)));
        assert_eq!(report.started, Some(BucketId(2)));
        assert_eq!(report.carried_over, 1);
        assert_eq!(window.active().bucket, BucketId(2));
        assert_eq!(tracker.item("AX-1").unwrap().bucket, Some(BucketId(1)));
        assert_eq!(tracker.item("AX-2").unwrap().bucket, Some(BucketId(2)));
        let mutations = tracker.mutations();
        let closed_at = mutations
            .iter()
            .position(|m| matches!(m, Mutation::SetBucketState { state: BucketState::Closed, .. }))
            .unwrap();
        assert!(matches!(mutations[0], Mutation::MoveToBucket { .. }));
        assert!(closed_at > 0);
    }

    #[tokio::test]
    async fn missing_active_bucket_starts_the_next_one() {
        let (_, future) = board(3);
        let tracker = tracker(future, vec![], vec![]);
        let (window, report) = prepare(&tracker, &settings(3), date(2026, 10, 27), &RetryPolicy::immediate(1))
            .await
            .unwrap();
        assert_eq!(report.started, Some(BucketId(2)));
        assert_eq!(window.active().bucket, BucketId(2));
    }

    #[tokio::test]
    async fn no_buckets_at_all_is_an_error_when_lifecycle_is_off() {
        let tracker = tracker(vec![], vec![], vec![]);
        let mut settings = settings(3);
        settings.manage_lifecycle = false;
        let result = prepare(&tracker, &settings, date(2026, 10, 27), &RetryPolicy::immediate(1)).await;
        assert!(matches!(result, Err(CycleError::NoActiveBucket)));
    }
}
