//! The query surface the info pipeline consumes.

use std::future::Future;

use proofview_types::{
    Diagnostic, GoalList, PlainGoal, PlainTermGoal, Position, ProtocolVersion, TermGoal,
    WidgetInstance,
};

use crate::error::BackendError;
use crate::protocol::{self, WidgetsResponse, methods};
use crate::server::LeanServer;

/// Goal, term-goal and widget queries for a position.
///
/// Implementations are shared by every info view, so all methods take
/// `&self` and may be called concurrently.
pub trait InfoBackend: Send + Sync + 'static {
    /// Fixed for the lifetime of the backend.
    fn protocol(&self) -> ProtocolVersion;

    fn goals(
        &self,
        position: &Position,
    ) -> impl Future<Output = Result<Option<GoalList>, BackendError>> + Send;

    fn term_goal(
        &self,
        position: &Position,
    ) -> impl Future<Output = Result<Option<TermGoal>, BackendError>> + Send;

    fn widgets(
        &self,
        position: &Position,
    ) -> impl Future<Output = Result<Vec<WidgetInstance>, BackendError>> + Send;

    fn plain_goal(
        &self,
        position: &Position,
    ) -> impl Future<Output = Result<Option<PlainGoal>, BackendError>> + Send;

    fn plain_term_goal(
        &self,
        position: &Position,
    ) -> impl Future<Output = Result<Option<PlainTermGoal>, BackendError>> + Send;

    /// Diagnostics starting on the position's line, most severe first.
    fn messages_at(&self, position: &Position) -> impl Future<Output = Vec<Diagnostic>> + Send;
}

impl InfoBackend for LeanServer {
    fn protocol(&self) -> ProtocolVersion {
        LeanServer::protocol(self)
    }

    async fn goals(&self, position: &Position) -> Result<Option<GoalList>, BackendError> {
        self.rpc_call(position, methods::INTERACTIVE_GOALS).await
    }

    async fn term_goal(&self, position: &Position) -> Result<Option<TermGoal>, BackendError> {
        self.rpc_call(position, methods::INTERACTIVE_TERM_GOAL).await
    }

    async fn widgets(&self, position: &Position) -> Result<Vec<WidgetInstance>, BackendError> {
        let response: Option<WidgetsResponse> =
            self.rpc_call(position, methods::GET_WIDGETS).await?;
        Ok(response.map(|r| r.widgets).unwrap_or_default())
    }

    async fn plain_goal(&self, position: &Position) -> Result<Option<PlainGoal>, BackendError> {
        self.request_typed(methods::PLAIN_GOAL, protocol::position_params(position))
            .await
    }

    async fn plain_term_goal(
        &self,
        position: &Position,
    ) -> Result<Option<PlainTermGoal>, BackendError> {
        self.request_typed(methods::PLAIN_TERM_GOAL, protocol::position_params(position))
            .await
    }

    async fn messages_at(&self, position: &Position) -> Vec<Diagnostic> {
        LeanServer::messages_at(self, position).await
    }
}
