//! Live proof-state pipeline for proofview.
//!
//! Each tracked position gets a slot task that decides when to query the
//! backend, retries queries invalidated by concurrent edits, and publishes
//! whole [`DisplayState`](proofview_types::DisplayState) values so readers
//! never see fields from two different fetch cycles.

mod committer;
mod fetcher;
mod guard;
mod infoview;
mod pause;
mod scheduler;
mod slot;

#[cfg(test)]
mod test_support;

pub use committer::{CommitDisposition, SnapshotCommitter};
pub use fetcher::GoalFetcher;
pub use guard::{FailureClass, GuardOutcome, StaleRequestGuard, classify};
pub use infoview::{EditorRequest, Infoview, InfoviewError, ViewId};
pub use pause::PauseController;
pub use scheduler::{Fired, RateLimitedScheduler, Trigger};
pub use slot::{CycleReport, InfoSlotHandle, SlotClosed, spawn_slot};
