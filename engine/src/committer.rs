//! Atomic publication of a slot's [`DisplayState`].
//!
//! The committer keeps the pipeline head (the newest state) and publishes
//! it through a `watch` channel. Each publication is one `send_replace` of
//! a whole value, so readers see either the old state or the new one.
//! While paused the head keeps moving and only publication stops.

use tokio::sync::watch;

use proofview_types::{DisplayState, FetchResult, FetchStatus, Position, ViewKind};

use crate::guard::GuardOutcome;
use crate::pause::PauseController;

/// What a commit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDisposition {
    /// Applied and visible to readers.
    Published,
    /// Applied to the head but withheld by the pause.
    Held,
    /// A later cycle was issued; the outcome was dropped.
    Superseded,
}

#[derive(Debug)]
pub struct SnapshotCommitter {
    head: DisplayState,
    issued: u64,
    pause: PauseController,
    tx: watch::Sender<DisplayState>,
}

impl SnapshotCommitter {
    #[must_use]
    pub fn new(kind: ViewKind) -> Self {
        let initial = DisplayState::new(kind);
        let (tx, _rx) = watch::channel(initial.clone());
        Self {
            head: initial,
            issued: 0,
            pause: PauseController::new(),
            tx,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.tx.subscribe()
    }

    /// The newest state, published or not.
    #[must_use]
    pub fn head(&self) -> &DisplayState {
        &self.head
    }

    /// What readers currently see.
    #[must_use]
    pub fn published(&self) -> DisplayState {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Start a cycle and return its generation. Every earlier cycle is
    /// superseded from here on.
    pub fn begin_cycle(&mut self) -> u64 {
        self.issued += 1;
        if self.head.status() != FetchStatus::Loading {
            self.head = self.head.clone().with_status(FetchStatus::Updating);
            if !self.pause.is_paused() {
                self.publish();
            }
        }
        self.issued
    }

    pub fn commit(
        &mut self,
        generation: u64,
        position: Position,
        outcome: GuardOutcome,
    ) -> CommitDisposition {
        if generation != self.issued {
            tracing::trace!(generation, issued = self.issued, "Dropping superseded cycle");
            return CommitDisposition::Superseded;
        }

        let head = self.head.clone();
        self.head = match outcome {
            GuardOutcome::Ready(snapshot) => {
                head.committed(position, generation, FetchResult::ready(snapshot))
            }
            GuardOutcome::Failed(message) => {
                head.committed(position, generation, FetchResult::failed(message))
            }
            GuardOutcome::Cleared => {
                // Nothing has completed yet, so there is nothing to be ready with.
                let status = if head.status() == FetchStatus::Loading {
                    FetchStatus::Loading
                } else {
                    FetchStatus::Ready
                };
                head.without_error(status)
            }
        };

        if self.pause.admit(generation) {
            self.publish();
            CommitDisposition::Published
        } else {
            CommitDisposition::Held
        }
    }

    /// Freeze publication. Readers get the visible state flagged as paused.
    pub fn pause(&mut self) {
        if self.pause.pause() {
            self.head = self.head.clone().with_paused(true);
            let visible = self.published().with_paused(true);
            self.tx.send_replace(visible);
        }
    }

    /// Publish the held head immediately.
    pub fn resume(&mut self) {
        if self.pause.resume() {
            self.head = self.head.clone().with_paused(false);
            self.publish();
        }
    }

    /// Returns the new pause flag.
    pub fn toggle_paused(&mut self) -> bool {
        if self.pause.is_paused() {
            self.resume();
        } else {
            self.pause();
        }
        self.pause.is_paused()
    }

    /// While paused, publish the first commit at or after `generation`.
    pub fn request_refresh(&mut self, generation: u64) {
        self.pause.request_refresh(generation);
    }

    fn publish(&self) {
        self.tx.send_replace(self.head.clone());
    }
}
