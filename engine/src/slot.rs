//! One tracked position: the task that wires scheduling, fetching and
//! committing together.
//!
//! The slot task owns its scheduler, committer and the reply channels of
//! in-flight cycles, so none of them sit behind a lock. Fetch cycles run as
//! separate tasks and report back to the slot, which commits only the most
//! recently issued generation.

use std::collections::HashMap;
use std::future;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

use proofview_lsp::InfoBackend;
use proofview_types::{DisplayState, FetchStatus, Position, SchedulerSettings, ViewKind};

use crate::committer::{CommitDisposition, SnapshotCommitter};
use crate::guard::{GuardOutcome, StaleRequestGuard};
use crate::scheduler::{Fired, RateLimitedScheduler, Trigger};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// How a requested cycle ended, as seen by the caller that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    /// Folded into a cycle that was already pending.
    Coalesced,
    /// Applied to the slot's state (published, or held while paused).
    Committed { generation: u64, status: FetchStatus },
    Failed { generation: u64, message: String },
    /// A later cycle was issued before this one finished.
    Superseded { generation: u64 },
    /// Nothing is tracked yet.
    NoPosition,
}

#[derive(Debug, thiserror::Error)]
#[error("info slot task has stopped")]
pub struct SlotClosed;

type Reply = oneshot::Sender<CycleReport>;

enum SlotCommand {
    Track {
        position: Position,
        busy: bool,
        reply: oneshot::Sender<bool>,
    },
    Processing {
        busy: bool,
    },
    Trigger {
        reply: Reply,
    },
    Refresh {
        reply: Reply,
    },
    SetPaused {
        paused: bool,
        reply: oneshot::Sender<()>,
    },
    TogglePause {
        reply: oneshot::Sender<bool>,
    },
}

struct CycleDone {
    generation: u64,
    position: Position,
    outcome: GuardOutcome,
}

/// Cloneable handle to a slot task. The task stops once every handle is
/// dropped; cycles still in flight are abandoned.
#[derive(Debug, Clone)]
pub struct InfoSlotHandle {
    kind: ViewKind,
    commands: mpsc::Sender<SlotCommand>,
    state: watch::Receiver<DisplayState>,
}

impl InfoSlotHandle {
    #[must_use]
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// The state readers currently see.
    #[must_use]
    pub fn state(&self) -> DisplayState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.state.clone()
    }

    /// Follow `position`. Returns whether it differs from the tracked one;
    /// only a real move schedules a cycle.
    pub async fn track(&self, position: Position, busy: bool) -> Result<bool, SlotClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SlotCommand::Track {
            position,
            busy,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SlotClosed)
    }

    /// The server started or finished processing the tracked document.
    pub async fn processing_changed(&self, busy: bool) -> Result<(), SlotClosed> {
        self.send(SlotCommand::Processing { busy }).await
    }

    /// Schedule a cycle for the tracked position and wait for its report.
    pub async fn trigger(&self) -> Result<CycleReport, SlotClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SlotCommand::Trigger { reply }).await?;
        rx.await.map_err(|_| SlotClosed)
    }

    /// Run a cycle now, skipping the scheduling delay. While paused its
    /// result is published once without unpausing.
    pub async fn refresh(&self) -> Result<CycleReport, SlotClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SlotCommand::Refresh { reply }).await?;
        rx.await.map_err(|_| SlotClosed)
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), SlotClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SlotCommand::SetPaused { paused, reply }).await?;
        rx.await.map_err(|_| SlotClosed)
    }

    /// Returns the new pause flag.
    pub async fn toggle_paused(&self) -> Result<bool, SlotClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SlotCommand::TogglePause { reply }).await?;
        rx.await.map_err(|_| SlotClosed)
    }

    async fn send(&self, command: SlotCommand) -> Result<(), SlotClosed> {
        self.commands.send(command).await.map_err(|_| SlotClosed)
    }
}

/// Spawn a slot task. `guard` carries the shared backend.
pub fn spawn_slot<B: InfoBackend>(
    kind: ViewKind,
    guard: StaleRequestGuard<B>,
    settings: SchedulerSettings,
) -> InfoSlotHandle {
    let (slot, handle) = InfoSlot::new(kind, guard, settings);
    tokio::spawn(slot.run());
    handle
}

struct InfoSlot<B> {
    kind: ViewKind,
    guard: StaleRequestGuard<B>,
    scheduler: RateLimitedScheduler<Position, Option<Reply>>,
    committer: SnapshotCommitter,
    position: Option<Position>,
    /// Callers waiting on each in-flight generation.
    replies: HashMap<u64, Vec<Reply>>,
    cycles: JoinSet<CycleDone>,
    commands: mpsc::Receiver<SlotCommand>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

impl<B: InfoBackend> InfoSlot<B> {
    fn new(
        kind: ViewKind,
        guard: StaleRequestGuard<B>,
        settings: SchedulerSettings,
    ) -> (Self, InfoSlotHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let committer = SnapshotCommitter::new(kind);
        let handle = InfoSlotHandle {
            kind,
            commands: tx,
            state: committer.subscribe(),
        };
        let slot = Self {
            kind,
            guard,
            scheduler: RateLimitedScheduler::new(settings),
            committer,
            position: None,
            replies: HashMap::new(),
            cycles: JoinSet::new(),
            commands: rx,
        };
        (slot, handle)
    }

    async fn run(mut self) {
        tracing::debug!(kind = ?self.kind, "Info slot started");
        loop {
            let deadline = self.scheduler.deadline();
            // Timer and completions first: a busy command channel must not
            // hold back a due cycle.
            tokio::select! {
                biased;
                () = sleep_until(deadline) => self.fire_due(),
                Some(joined) = self.cycles.join_next() => match joined {
                    Ok(done) => self.finish(done),
                    Err(e) => tracing::error!(kind = ?self.kind, "Fetch cycle task failed: {e}"),
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        tracing::debug!(kind = ?self.kind, "Info slot stopped");
    }

    fn handle(&mut self, command: SlotCommand) {
        match command {
            SlotCommand::Track {
                position,
                busy,
                reply,
            } => {
                self.scheduler.set_busy(busy);
                let moved = self.position.as_ref() != Some(&position);
                if moved {
                    self.position = Some(position);
                    self.schedule(None);
                }
                let _ = reply.send(moved);
            }
            SlotCommand::Processing { busy } => {
                self.scheduler.set_busy(busy);
                if self.position.is_some() {
                    self.schedule(None);
                }
            }
            SlotCommand::Trigger { reply } => self.schedule(Some(reply)),
            SlotCommand::Refresh { reply } => self.refresh(reply),
            SlotCommand::SetPaused { paused, reply } => {
                if paused {
                    self.committer.pause();
                } else {
                    self.committer.resume();
                }
                let _ = reply.send(());
            }
            SlotCommand::TogglePause { reply } => {
                let paused = self.committer.toggle_paused();
                tracing::debug!(kind = ?self.kind, paused, "Pause toggled");
                let _ = reply.send(paused);
            }
        }
    }

    fn schedule(&mut self, reply: Option<Reply>) {
        let Some(position) = self.position.clone() else {
            if let Some(reply) = reply {
                let _ = reply.send(CycleReport::NoPosition);
            }
            return;
        };
        match self.scheduler.trigger(position, reply, Instant::now()) {
            Trigger::Armed { deadline } => {
                tracing::trace!(kind = ?self.kind, ?deadline, "Fetch cycle armed");
            }
            Trigger::Coalesced { waiter } => {
                if let Some(reply) = waiter {
                    let _ = reply.send(CycleReport::Coalesced);
                }
            }
        }
    }

    fn refresh(&mut self, reply: Reply) {
        let Some(position) = self.position.clone() else {
            let _ = reply.send(CycleReport::NoPosition);
            return;
        };
        let mut replies = vec![reply];
        // A pending cycle would only repeat this one; its caller waits on
        // the forced cycle instead.
        if let Some(Fired { waiter, .. }) = self.scheduler.cancel() {
            replies.extend(waiter);
        }
        let generation = self.start_cycle(position, replies);
        self.committer.request_refresh(generation);
    }

    fn fire_due(&mut self) {
        if let Some(Fired { action, waiter }) = self.scheduler.fire_due(Instant::now()) {
            self.start_cycle(action, waiter.into_iter().collect());
        }
    }

    fn start_cycle(&mut self, position: Position, replies: Vec<Reply>) -> u64 {
        let generation = self.committer.begin_cycle();
        tracing::debug!(kind = ?self.kind, generation, %position, "Fetch cycle started");
        if !replies.is_empty() {
            self.replies.insert(generation, replies);
        }
        let guard = self.guard.clone();
        self.cycles.spawn(async move {
            let outcome = guard.run(&position).await;
            CycleDone {
                generation,
                position,
                outcome,
            }
        });
        generation
    }

    fn finish(&mut self, done: CycleDone) {
        let CycleDone {
            generation,
            position,
            outcome,
        } = done;
        let failure = match &outcome {
            GuardOutcome::Failed(message) => Some(message.clone()),
            _ => None,
        };

        let disposition = self.committer.commit(generation, position, outcome);
        tracing::debug!(kind = ?self.kind, generation, ?disposition, "Fetch cycle finished");

        let report = match (disposition, failure) {
            (CommitDisposition::Superseded, _) => CycleReport::Superseded { generation },
            (_, Some(message)) => CycleReport::Failed {
                generation,
                message,
            },
            _ => CycleReport::Committed {
                generation,
                status: self.committer.head().status(),
            },
        };
        for reply in self.replies.remove(&generation).unwrap_or_default() {
            let _ = reply.send(report.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::fetcher::GoalFetcher;
    use crate::test_support::{
        FakeBackend, content_modified, goal_text, method_not_found, position, term_text,
    };
    use proofview_lsp::{BackendError, codes};

    fn settings() -> SchedulerSettings {
        SchedulerSettings::new(Duration::from_millis(50), Duration::from_millis(500))
    }

    fn spawn(backend: &Arc<FakeBackend>, kind: ViewKind) -> InfoSlotHandle {
        let guard = StaleRequestGuard::new(GoalFetcher::new(Arc::clone(backend)));
        spawn_slot(kind, guard, settings())
    }

    /// Every state published from now on.
    fn record(handle: &InfoSlotHandle) -> Arc<Mutex<Vec<DisplayState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut rx = handle.subscribe();
        let _ = rx.borrow_and_update();
        let sink = Arc::clone(&seen);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                sink.lock().unwrap().push(state);
            }
        });
        seen
    }

    async fn wait_for_position(handle: &InfoSlotHandle, line: u32) -> DisplayState {
        let mut rx = handle.subscribe();
        let target = position(line);
        rx.wait_for(|s| s.position() == Some(&target) && s.status() != FetchStatus::Updating)
            .await
            .unwrap()
            .clone()
    }

    fn assert_consistent(state: &DisplayState) {
        let Some(pos) = state.position() else { return };
        if let Some(goals) = &state.result().goals {
            assert_eq!(goals.to_plain(), goal_text(pos.line()));
        }
        if let Some(term) = &state.result().term_goal {
            assert_eq!(term.goal.to_plain(), term_text(pos.line()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn due_cycle_fires_ahead_of_queued_commands() {
        let backend = Arc::new(FakeBackend::interactive());
        let guard = StaleRequestGuard::new(GoalFetcher::new(Arc::clone(&backend)));
        let (mut slot, handle) = InfoSlot::new(ViewKind::Cursor, guard, settings());

        slot.position = Some(position(1));
        slot.schedule(None);
        tokio::time::advance(Duration::from_millis(60)).await;

        // Queued before the task first runs, alongside the overdue deadline.
        let (reply, report) = oneshot::channel();
        assert!(
            handle
                .commands
                .try_send(SlotCommand::Trigger { reply })
                .is_ok()
        );
        tokio::spawn(slot.run());

        // The overdue cycle started first, so the trigger armed a new one
        // instead of folding into it.
        assert!(matches!(
            report.await.unwrap(),
            CycleReport::Committed { generation: 2, .. }
        ));
        assert_eq!(backend.queried()[0], position(1));
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_within_interval_coalesce_to_latest() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Cursor);
        let start = Instant::now();

        assert!(slot.track(position(1), false).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(slot.track(position(2), false).await.unwrap());

        let state = wait_for_position(&slot, 2).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(60));
        assert_eq!(state.status(), FetchStatus::Ready);
        assert_eq!(backend.goal_calls(), 1);
        assert_eq!(backend.queried(), vec![position(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_reports_coalesced_and_committed() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Cursor);
        slot.track(position(1), false).await.unwrap();
        wait_for_position(&slot, 1).await;

        let first = tokio::spawn({
            let slot = slot.clone();
            async move { slot.trigger().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(slot.trigger().await.unwrap(), CycleReport::Coalesced);

        let report = first.await.unwrap().unwrap();
        assert_eq!(
            report,
            CycleReport::Committed {
                generation: 2,
                status: FetchStatus::Ready
            }
        );
        assert_eq!(backend.goal_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn same_position_is_noise() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Cursor);
        assert!(slot.track(position(1), false).await.unwrap());
        wait_for_position(&slot, 1).await;

        assert!(!slot.track(position(1), false).await.unwrap());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.goal_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_an_interval_apart_run_separately() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Cursor);

        slot.track(position(1), false).await.unwrap();
        wait_for_position(&slot, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        slot.track(position(2), false).await.unwrap();
        wait_for_position(&slot, 2).await;

        assert_eq!(backend.queried(), vec![position(1), position(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_document_waits_slow_interval() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Cursor);
        let start = Instant::now();

        slot.track(position(1), true).await.unwrap();
        wait_for_position(&slot, 1).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(510));
    }

    #[tokio::test(start_paused = true)]
    async fn processing_change_refetches_tracked_position() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Cursor);
        slot.track(position(1), true).await.unwrap();
        wait_for_position(&slot, 1).await;

        slot.processing_changed(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.goal_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_document_never_shows_error() {
        let backend = Arc::new(
            FakeBackend::interactive()
                .fail_goals_with(content_modified())
                .fail_goals_with(content_modified()),
        );
        let slot = spawn(&backend, ViewKind::Cursor);
        let seen = record(&slot);

        slot.track(position(4), false).await.unwrap();
        let state = wait_for_position(&slot, 4).await;
        assert_eq!(state.status(), FetchStatus::Ready);
        assert_eq!(backend.goal_calls(), 3);
        assert!(
            seen.lock()
                .unwrap()
                .iter()
                .all(|s| s.status() != FetchStatus::Error)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_completion_of_older_cycle_is_discarded() {
        let backend =
            Arc::new(FakeBackend::interactive().delay_line(1, Duration::from_millis(500)));
        let slot = spawn(&backend, ViewKind::Cursor);
        let seen = record(&slot);

        slot.track(position(1), false).await.unwrap();
        // Cycle for line 1 starts at 50ms and answers at 550ms.
        tokio::time::sleep(Duration::from_millis(100)).await;
        slot.track(position(2), false).await.unwrap();
        wait_for_position(&slot, 2).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        let state = slot.state();
        assert_eq!(state.position(), Some(&position(2)));
        assert_eq!(state.generation(), 2);

        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|s| s.position() != Some(&position(1))));
        seen.iter().for_each(assert_consistent);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_and_refresh_publishes_once() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Pinned);
        slot.track(position(1), false).await.unwrap();
        wait_for_position(&slot, 1).await;

        assert!(slot.toggle_paused().await.unwrap());
        assert!(slot.state().is_paused());
        let seen = record(&slot);

        slot.track(position(2), false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.goal_calls(), 2, "polling continues while paused");
        assert_eq!(slot.state().position(), Some(&position(1)));
        assert!(seen.lock().unwrap().is_empty());

        let report = slot.refresh().await.unwrap();
        assert!(matches!(report, CycleReport::Committed { .. }));
        let state = slot.state();
        assert_eq!(state.position(), Some(&position(2)));
        assert!(state.is_paused());
        assert_eq!(seen.lock().unwrap().len(), 1);

        slot.track(position(3), false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(slot.state().position(), Some(&position(2)));

        assert!(!slot.toggle_paused().await.unwrap());
        let state = slot.state();
        assert!(!state.is_paused());
        assert_eq!(state.position(), Some(&position(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_runs_immediately_and_absorbs_pending() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Cursor);
        let start = Instant::now();
        slot.track(position(1), false).await.unwrap();

        let report = slot.refresh().await.unwrap();
        assert_eq!(
            report,
            CycleReport::Committed {
                generation: 1,
                status: FetchStatus::Ready
            }
        );
        assert!(start.elapsed() < Duration::from_millis(50));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.goal_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_widgets_commit_ready() {
        let backend = Arc::new(FakeBackend::interactive().fail_widgets_with(method_not_found()));
        let slot = spawn(&backend, ViewKind::Cursor);
        slot.track(position(1), false).await.unwrap();

        let state = wait_for_position(&slot, 1).await;
        assert_eq!(state.status(), FetchStatus::Ready);
        assert_eq!(state.result().widgets, Some(Vec::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn genuine_error_replaces_goals() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Cursor);
        slot.track(position(1), false).await.unwrap();
        wait_for_position(&slot, 1).await;

        backend.push_goal_error(BackendError::rpc(codes::WORKER_CRASHED, "worker crashed"));
        let report = slot.refresh().await.unwrap();
        assert_eq!(
            report,
            CycleReport::Failed {
                generation: 2,
                message: "Error updating: worker crashed (code -32902).".into()
            }
        );
        let state = slot.state();
        assert_eq!(state.status(), FetchStatus::Error);
        assert!(state.result().goals.is_none());
        assert!(state.result().widgets.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_without_position() {
        let backend = Arc::new(FakeBackend::interactive());
        let slot = spawn(&backend, ViewKind::Cursor);
        assert_eq!(slot.trigger().await.unwrap(), CycleReport::NoPosition);
        assert_eq!(slot.refresh().await.unwrap(), CycleReport::NoPosition);
        assert_eq!(slot.state().status(), FetchStatus::Loading);
    }
}
