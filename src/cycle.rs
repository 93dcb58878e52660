//! Cycle runner.
//!
//! One cycle runs every stage in order against the tracker:
//!
//! ```text
//! Window -> Roadmap -> Pack -> Rebalance (-> Pack) -> Sync -> Align -> Order -> Report
//! ```
//!
//! A stage that cannot read the tracker is recorded and skipped; the cycle
//! always finishes with a [`CycleSummary`]. Only one cycle may run at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use sprintline_common::{BucketId, ItemKey, ItemStatus};

use crate::config::SprintlineToml;
use crate::engine::align::{self, AlignSettings};
use crate::engine::ordering;
use crate::engine::packer::{self, BucketSlot};
use crate::engine::priority::{RankContext, rank_items};
use crate::engine::rebalance::{BucketLoad, RebalanceOutcome, Rebalancer};
use crate::engine::roadmap::{self, RoadmapSettings};
use crate::engine::sync;
use crate::engine::window::{self, ColumnWindow, WindowSettings};
use crate::errors::CycleError;
use crate::generator::ContentGenerator;
use crate::notify::{self, Notifier};
use crate::tracker::{ItemFilter, RetryPolicy, Tracker, with_retry};

/// Engine settings a cycle needs, taken from `sprintline.toml`.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub capacity: f64,
    pub window: WindowSettings,
    pub rebalance_pass_limit: u32,
    /// Statuses the packer draws from the unscheduled backlog.
    pub pack_statuses: Vec<ItemStatus>,
    pub assignee: Option<String>,
    pub roadmap: RoadmapSettings,
    /// `None` when alignment is switched off.
    pub align: Option<AlignSettings>,
}

impl From<&SprintlineToml> for CycleSettings {
    fn from(toml: &SprintlineToml) -> Self {
        let engine = &toml.engine;
        let mut pack_statuses = vec![ItemStatus::Ready];
        if engine.pack_backlog_items {
            pack_statuses.push(ItemStatus::Backlog);
        }
        Self {
            capacity: engine.capacity,
            window: WindowSettings {
                width: engine.window_width,
                cadence: engine.cadence(),
                length_days: engine.sprint_length_days,
                manage_lifecycle: engine.manage_lifecycle,
            },
            rebalance_pass_limit: engine.rebalance_pass_limit,
            pack_statuses,
            assignee: toml.tracker.assignee.clone(),
            roadmap: RoadmapSettings {
                max_per_column: engine.max_ideas_per_column,
                promote: toml.roadmap.promote_ideas,
                promote_min_score: toml.roadmap.promote_min_score,
                delivery_status: toml.roadmap.delivery_status.clone(),
            },
            align: toml.alignment.enabled.then(|| AlignSettings {
                min_confidence: toml.alignment.min_confidence,
            }),
        }
    }
}

/// Outcome of one cycle, printed as JSON by the CLI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub date: NaiveDate,
    pub duration_ms: u64,
    pub active_bucket: Option<BucketId>,
    pub window_advanced: bool,
    pub buckets_created: usize,
    pub bucket_closed: Option<BucketId>,
    pub bucket_started: Option<BucketId>,
    pub carried_over: usize,
    pub columns_changed: usize,
    pub ideas_placed: usize,
    pub ideas_promoted: usize,
    /// Backlog items considered by the packer.
    pub ranked: usize,
    pub packed: usize,
    pub moved: usize,
    pub rebalance: Option<RebalanceOutcome>,
    pub synced: usize,
    pub aligned: usize,
    pub reordered: usize,
    pub unsized_items: Vec<ItemKey>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl CycleSummary {
    fn new(cycle_id: Uuid, date: NaiveDate) -> Self {
        Self {
            cycle_id,
            date,
            ..Default::default()
        }
    }

    fn record(&mut self, error: CycleError) {
        tracing::error!(error = %error, "Stage failed");
        self.errors.push(error.to_string());
    }

    /// Text for the cycle notification, if anything needs attention.
    pub fn alert(&self) -> Option<String> {
        if self.warnings.is_empty() && self.errors.is_empty() {
            return None;
        }
        let mut lines = vec![format!("sprintline cycle {} ({})", self.cycle_id, self.date)];
        lines.extend(self.errors.iter().map(|e| format!("error: {}", e)));
        lines.extend(self.warnings.iter().map(|w| format!("warning: {}", w)));
        Some(lines.join("\n"))
    }
}

/// Clears the in-flight flag when the cycle ends, however it ends.
pub(crate) struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CycleRunner {
    tracker: Arc<dyn Tracker>,
    generator: Arc<dyn ContentGenerator>,
    generator_available: bool,
    notifier: Arc<dyn Notifier>,
    settings: CycleSettings,
    retry: RetryPolicy,
    in_flight: AtomicBool,
}

impl CycleRunner {
    pub fn new(
        tracker: Arc<dyn Tracker>,
        generator: Arc<dyn ContentGenerator>,
        notifier: Arc<dyn Notifier>,
        settings: CycleSettings,
    ) -> Self {
        let generator_available = generator.is_available();
        if !generator_available {
            tracing::info!("Content generator unavailable, alignment disabled");
        }
        Self {
            tracker,
            generator,
            generator_available,
            notifier,
            settings,
            retry: RetryPolicy::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn begin(&self) -> Option<CycleGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(&self.in_flight))
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one cycle for `today`. `None` when another cycle is in flight.
    pub async fn trigger(&self, today: NaiveDate) -> Option<CycleSummary> {
        let Some(_guard) = self.begin() else {
            tracing::warn!("Cycle already in flight, skipping trigger");
            return None;
        };
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("cycle", id = %cycle_id, date = %today);
        Some(self.run(cycle_id, today).instrument(span).await)
    }

    async fn run(&self, cycle_id: Uuid, today: NaiveDate) -> CycleSummary {
        let started = Instant::now();
        let mut summary = CycleSummary::new(cycle_id, today);
        tracing::info!("Cycle started");

        if let Some(window) = self.window_stage(today, &mut summary).await {
            self.roadmap_stage(&window, &mut summary).await;
            match self.rank_context(&window).await {
                Ok(ctx) => self.allocation_stages(&window, &ctx, &mut summary).await,
                Err(e) => summary.record(e),
            }
            match sync::synchronize(self.tracker.as_ref(), &window, &self.retry).await {
                Ok(report) => {
                    summary.synced = report.updated.len();
                    for key in report.failed {
                        summary.warnings.push(format!("roadmap column of {} not synced", key));
                    }
                }
                Err(e) => summary.record(e),
            }
            self.align_stage(&mut summary).await;
            self.order_stage(&window, &mut summary).await;
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        if let Some(alert) = summary.alert() {
            notify::deliver(self.notifier.as_ref(), &alert).await;
        }
        tracing::info!(
            packed = summary.packed,
            moved = summary.moved,
            synced = summary.synced,
            aligned = summary.aligned,
            errors = summary.errors.len(),
            duration_ms = summary.duration_ms,
            "Cycle finished"
        );
        summary
    }

    async fn window_stage(&self, today: NaiveDate, summary: &mut CycleSummary) -> Option<ColumnWindow> {
        match window::prepare(self.tracker.as_ref(), &self.settings.window, today, &self.retry).await {
            Ok((window, report)) => {
                summary.active_bucket = report.active;
                summary.window_advanced = report.advanced;
                summary.buckets_created = report.buckets_created;
                summary.bucket_closed = report.closed;
                summary.bucket_started = report.started;
                summary.carried_over = report.carried_over;
                summary.columns_changed = report.columns.retired.len() + report.columns.added.len();
                summary.errors.extend(report.errors);
                Some(window)
            }
            Err(e) => {
                summary.record(e);
                None
            }
        }
    }

    async fn roadmap_stage(&self, window: &ColumnWindow, summary: &mut CycleSummary) {
        match roadmap::arrange(self.tracker.as_ref(), window, &self.settings.roadmap, &self.retry).await {
            Ok(report) => {
                summary.ideas_placed = report.placed.len();
                summary.ideas_promoted = report.promoted.len();
                for key in report.failed {
                    summary.warnings.push(format!("idea {} not placed or promoted", key));
                }
            }
            Err(e) => summary.record(e),
        }
    }

    async fn rank_context(&self, window: &ColumnWindow) -> Result<RankContext, CycleError> {
        let ideas = with_retry(&self.retry, "query_ideas", || self.tracker.query_ideas())
            .await
            .map_err(|source| CycleError::Observe { stage: "rank", source })?;
        Ok(RankContext::new(&ideas, &window.labels()))
    }

    async fn bucket_loads(&self, window: &ColumnWindow, stage: &'static str) -> Result<Vec<BucketLoad>, CycleError> {
        let mut loads = Vec::with_capacity(window.future().len());
        for column in window.future() {
            let filter = ItemFilter::InBucket(column.bucket);
            let members = with_retry(&self.retry, "query_items", || self.tracker.query_items(&filter))
                .await
                .map_err(|source| CycleError::Observe { stage, source })?;
            loads.push(BucketLoad {
                bucket: column.bucket,
                members,
            });
        }
        Ok(loads)
    }

    async fn pack_stage(&self, window: &ColumnWindow, ctx: &RankContext, summary: &mut CycleSummary) -> Result<(), CycleError> {
        let filter = ItemFilter::Unscheduled {
            statuses: self.settings.pack_statuses.clone(),
            assignee: self.settings.assignee.clone(),
        };
        let backlog = with_retry(&self.retry, "query_items", || self.tracker.query_items(&filter))
            .await
            .map_err(|source| CycleError::Observe { stage: "pack", source })?;
        let mut ranked = packer::backlog_candidates(backlog, window);
        rank_items(&mut ranked, ctx);
        summary.ranked = summary.ranked.max(ranked.len());

        let slots: Vec<BucketSlot> = self
            .bucket_loads(window, "pack")
            .await?
            .iter()
            .map(|load| BucketSlot::new(load.bucket, &load.members, self.settings.capacity))
            .collect();
        let plan = packer::pack(&ranked, &slots);
        for key in &plan.unsized_items {
            if !summary.unsized_items.contains(key) {
                summary.unsized_items.push(key.clone());
            }
        }
        let outcome = packer::apply(self.tracker.as_ref(), &plan, window.active().bucket, &self.retry).await;
        summary.packed += outcome.packed;
        for key in outcome.failed {
            summary.warnings.push(format!("{} could not be packed", key));
        }
        Ok(())
    }

    async fn allocation_stages(&self, window: &ColumnWindow, ctx: &RankContext, summary: &mut CycleSummary) {
        if let Err(e) = self.pack_stage(window, ctx, summary).await {
            summary.record(e);
            return;
        }

        let loads = match self.bucket_loads(window, "rebalance").await {
            Ok(loads) => loads,
            Err(e) => {
                summary.record(e);
                return;
            }
        };
        let rebalancer = Rebalancer::new(self.settings.capacity, self.settings.rebalance_pass_limit);
        let report = rebalancer.run(self.tracker.as_ref(), loads, ctx, &self.retry).await;
        summary.moved = report.moves.len();
        summary.rebalance = Some(report.outcome);
        for overflow in report.violations() {
            summary.warnings.push(format!(
                "bucket {} holds {} points over capacity {} ({:?})",
                overflow.bucket, overflow.committed, self.settings.capacity, overflow.reason
            ));
        }
        for key in &report.failed_moves {
            summary.warnings.push(format!("{} could not be moved", key));
        }

        // Room freed by the cascade is filled now so the next cycle has nothing to do.
        if !report.moves.is_empty()
            && let Err(e) = self.pack_stage(window, ctx, summary).await
        {
            summary.record(e);
        }
    }

    async fn align_stage(&self, summary: &mut CycleSummary) {
        let Some(settings) = &self.settings.align else {
            return;
        };
        if !self.generator_available {
            return;
        }
        match align::align(self.tracker.as_ref(), self.generator.as_ref(), settings, &self.retry).await {
            Ok(report) => {
                summary.aligned = report.aligned.len();
                for key in report.failed {
                    summary.warnings.push(format!("alignment of {} not written", key));
                }
            }
            Err(e) => summary.record(e),
        }
    }

    async fn order_stage(&self, window: &ColumnWindow, summary: &mut CycleSummary) {
        let ctx = match self.rank_context(window).await {
            Ok(ctx) => ctx,
            Err(e) => {
                summary.record(e);
                return;
            }
        };
        let assignee = self.settings.assignee.as_deref();
        match ordering::order(self.tracker.as_ref(), window, &ctx, assignee, &self.retry).await {
            Ok(report) => {
                summary.reordered = report.moves;
                for key in report.failed {
                    summary.warnings.push(format!("{} could not be ranked", key));
                }
            }
            Err(e) => summary.record(e),
        }
    }
}
