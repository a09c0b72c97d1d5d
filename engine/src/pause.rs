//! Freezing the visible state while the pipeline keeps running.

#[derive(Debug, Default)]
pub struct PauseController {
    paused: bool,
    /// While paused, the first commit at or after this generation is
    /// published anyway.
    refresh_from: Option<u64>,
}

impl PauseController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns whether the state changed.
    pub fn pause(&mut self) -> bool {
        let changed = !self.paused;
        self.paused = true;
        changed
    }

    /// Returns whether the state changed. Any outstanding forced refresh is
    /// dropped; the held state is about to be published anyway.
    pub fn resume(&mut self) -> bool {
        let changed = self.paused;
        self.paused = false;
        self.refresh_from = None;
        changed
    }

    /// Let one commit through while paused. Has no effect when running.
    pub fn request_refresh(&mut self, generation: u64) {
        if self.paused {
            self.refresh_from = Some(generation);
        }
    }

    /// Decide whether a non-superseded commit of `generation` is published.
    pub fn admit(&mut self, generation: u64) -> bool {
        if !self.paused {
            return true;
        }
        match self.refresh_from {
            Some(from) if generation >= from => {
                self.refresh_from = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_admits_everything() {
        let mut pause = PauseController::new();
        assert!(pause.admit(1));
        assert!(pause.admit(2));
    }

    #[test]
    fn paused_holds_commits() {
        let mut pause = PauseController::new();
        assert!(pause.pause());
        assert!(!pause.pause());
        assert!(!pause.admit(3));
    }

    #[test]
    fn refresh_admits_exactly_one() {
        let mut pause = PauseController::new();
        pause.pause();
        pause.request_refresh(5);
        assert!(!pause.admit(4), "earlier cycle must not use the refresh");
        assert!(pause.admit(5));
        assert!(!pause.admit(6));
        assert!(pause.is_paused());
    }

    #[test]
    fn refresh_ignored_when_running() {
        let mut pause = PauseController::new();
        pause.request_refresh(1);
        pause.pause();
        assert!(!pause.admit(1));
    }

    #[test]
    fn resume_drops_refresh() {
        let mut pause = PauseController::new();
        pause.pause();
        pause.request_refresh(2);
        assert!(pause.resume());
        assert!(!pause.resume());

        pause.pause();
        assert!(!pause.admit(2));
    }
}
