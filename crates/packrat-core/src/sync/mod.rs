//! The sync engine: change tracking, pull/push pipelines, conflict
//! detection and resolution, and the orchestrator that ties them together.

mod change;
mod conflict;
mod diff;
mod engine;
mod pull;
mod push;
mod resolver;
mod state;
mod tracker;

pub use change::{Change, ChangeOperation};
pub use conflict::{ConflictDetails, ConflictType, SyncConflict};
pub use diff::{diff_values, merge_non_conflicting, DiffKind, FieldDiff};
pub use engine::{CycleReport, SyncEngine, SyncOptions};
pub use pull::{AppliedUpsert, PullOutcome, PullPipeline};
pub use push::{PushPipeline, PushReport};
pub use resolver::{ConflictResolver, FieldChoice, ResolutionStrategy};
pub use state::{StateDebouncer, SyncEvent, SyncState};
pub use tracker::ChangeTracker;
