//! Shared domain types for the sprintline reconciler.
//!
//! The tracker owns every one of these records. The engine reads them at the
//! start of a stage and writes back individual fields; nothing here is cached
//! across cycles.

mod bucket;
mod idea;
mod item;
mod key;

pub use bucket::{Bucket, BucketDraft, BucketId, BucketState};
pub use idea::{Idea, Swimlane};
pub use item::{Field, ItemKind, ItemStatus, LinkType, NewItem, Priority, WorkItem};
pub use key::ItemKey;
