//! One fetch cycle's worth of backend queries.

use std::sync::Arc;

use proofview_lsp::{BackendError, InfoBackend};
use proofview_types::{GoalList, InfoSnapshot, Position, ProtocolVersion, TermGoal};

/// Issues the goal, term-goal and widget queries for a position.
///
/// The protocol surface is read from the backend once, at construction.
pub struct GoalFetcher<B> {
    backend: Arc<B>,
    protocol: ProtocolVersion,
}

impl<B> Clone for GoalFetcher<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            protocol: self.protocol,
        }
    }
}

impl<B: InfoBackend> GoalFetcher<B> {
    #[must_use]
    pub fn new(backend: Arc<B>) -> Self {
        let protocol = backend.protocol();
        Self { backend, protocol }
    }

    #[must_use]
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Query everything shown for `position`. Nothing is written anywhere;
    /// the caller decides what to do with the snapshot.
    pub async fn fetch(&self, position: &Position) -> Result<InfoSnapshot, BackendError> {
        let mut snapshot = match self.protocol {
            ProtocolVersion::Interactive => self.fetch_interactive(position).await?,
            ProtocolVersion::Legacy => self.fetch_legacy(position).await?,
        };
        snapshot.messages = self.backend.messages_at(position).await;
        Ok(snapshot)
    }

    async fn fetch_interactive(&self, position: &Position) -> Result<InfoSnapshot, BackendError> {
        // Both futures are polled to completion before either result is
        // inspected, so neither failure goes unobserved.
        let (goals, term_goal) = tokio::join!(
            self.backend.goals(position),
            self.backend.term_goal(position)
        );
        let goals = goals?;
        let term_goal = term_goal?;

        let widgets = match self.backend.widgets(position).await {
            Ok(widgets) => widgets,
            Err(err) if err.is_method_not_found() => {
                tracing::debug!(%position, "Widget query unsupported, showing none");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        Ok(InfoSnapshot {
            goals,
            term_goal,
            widgets: Some(widgets),
            messages: Vec::new(),
        })
    }

    async fn fetch_legacy(&self, position: &Position) -> Result<InfoSnapshot, BackendError> {
        let (goals, term_goal) = tokio::join!(
            self.backend.plain_goal(position),
            self.backend.plain_term_goal(position)
        );
        let goals = goals?.map(GoalList::from);
        let term_goal = match term_goal {
            Ok(term_goal) => term_goal.map(TermGoal::from),
            Err(err) if err.is_method_not_found() => None,
            Err(err) => return Err(err),
        };

        Ok(InfoSnapshot {
            goals,
            term_goal,
            widgets: None,
            messages: Vec::new(),
        })
    }
}
