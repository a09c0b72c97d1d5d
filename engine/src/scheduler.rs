//! Latest-wins, trailing-edge scheduling of fetch cycles.
//!
//! At most one cycle is pending at a time. The first trigger arms a one-shot
//! deadline; later triggers before it fires only replace the action that
//! will run. The deadline is never pushed back, so a steady stream of
//! triggers still fires once per interval with the freshest parameters.

use tokio::time::Instant;

use proofview_types::SchedulerSettings;

/// What happened to a trigger.
#[derive(Debug, PartialEq, Eq)]
pub enum Trigger<W> {
    /// A new cycle was armed; the caller's waiter is attached to it.
    Armed { deadline: Instant },
    /// A cycle was already pending. Its action was replaced and the caller's
    /// waiter is handed back to be resolved right away.
    Coalesced { waiter: W },
}

/// A cycle whose deadline has passed.
#[derive(Debug)]
pub struct Fired<A, W> {
    pub action: A,
    pub waiter: W,
}

#[derive(Debug)]
struct Pending<A, W> {
    action: A,
    waiter: W,
    deadline: Instant,
}

#[derive(Debug)]
pub struct RateLimitedScheduler<A, W> {
    settings: SchedulerSettings,
    busy: bool,
    pending: Option<Pending<A, W>>,
}

impl<A, W> RateLimitedScheduler<A, W> {
    #[must_use]
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            busy: false,
            pending: None,
        }
    }

    pub fn trigger(&mut self, action: A, waiter: W, now: Instant) -> Trigger<W> {
        if let Some(pending) = &mut self.pending {
            pending.action = action;
            return Trigger::Coalesced { waiter };
        }
        let deadline = now + self.settings.delay(self.busy);
        self.pending = Some(Pending {
            action,
            waiter,
            deadline,
        });
        Trigger::Armed { deadline }
    }

    /// Select the interval used the next time a cycle is armed. A cycle
    /// that is already pending keeps its deadline.
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending cycle if its deadline has passed.
    pub fn fire_due(&mut self, now: Instant) -> Option<Fired<A, W>> {
        if self.pending.as_ref()?.deadline > now {
            return None;
        }
        self.cancel()
    }

    /// Take the pending cycle regardless of its deadline.
    pub fn cancel(&mut self) -> Option<Fired<A, W>> {
        self.pending
            .take()
            .map(|Pending { action, waiter, .. }| Fired { action, waiter })
    }
}
