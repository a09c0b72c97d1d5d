//! Scripted in-memory backend for pipeline tests.
//!
//! Every answer is derived from the queried position (`goal@L`, `term@L`),
//! so a committed state shows which cycle each field came from.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use proofview_lsp::{BackendError, InfoBackend, codes};
use proofview_types::{
    Diagnostic, DiagnosticSeverity, Goal, GoalList, LineCol, PlainGoal, PlainTermGoal, Position,
    ProtocolVersion, Range, TermGoal, WidgetInstance,
};

pub(crate) fn goal_text(line: u32) -> String {
    format!("goal@{line}")
}

pub(crate) fn term_text(line: u32) -> String {
    format!("term@{line}")
}

pub(crate) fn content_modified() -> BackendError {
    BackendError::rpc(codes::CONTENT_MODIFIED, "content modified")
}

pub(crate) fn method_not_found() -> BackendError {
    BackendError::rpc(codes::METHOD_NOT_FOUND, "method not found")
}

pub(crate) fn position(line: u32) -> Position {
    Position::new("file:///work/Main.lean", line, 0)
}

pub(crate) struct FakeBackend {
    protocol: ProtocolVersion,
    goal_errors: Mutex<VecDeque<BackendError>>,
    term_goal_error: Mutex<Option<BackendError>>,
    widget_error: Mutex<Option<BackendError>>,
    delays: Mutex<HashMap<u32, Duration>>,
    messages: Vec<Diagnostic>,
    goal_calls: AtomicUsize,
    term_calls: AtomicUsize,
    queried: Mutex<Vec<Position>>,
}

impl FakeBackend {
    pub fn interactive() -> Self {
        Self::with_protocol(ProtocolVersion::Interactive)
    }

    pub fn legacy() -> Self {
        Self::with_protocol(ProtocolVersion::Legacy)
    }

    fn with_protocol(protocol: ProtocolVersion) -> Self {
        Self {
            protocol,
            goal_errors: Mutex::new(VecDeque::new()),
            term_goal_error: Mutex::new(None),
            widget_error: Mutex::new(None),
            delays: Mutex::new(HashMap::new()),
            messages: Vec::new(),
            goal_calls: AtomicUsize::new(0),
            term_calls: AtomicUsize::new(0),
            queried: Mutex::new(Vec::new()),
        }
    }

    /// Queue an error for the next goal query; queued errors are used in order.
    pub fn fail_goals_with(self, err: BackendError) -> Self {
        self.goal_errors.lock().unwrap().push_back(err);
        self
    }

    pub fn fail_term_goal_with(self, err: BackendError) -> Self {
        *self.term_goal_error.lock().unwrap() = Some(err);
        self
    }

    pub fn fail_widgets_with(self, err: BackendError) -> Self {
        *self.widget_error.lock().unwrap() = Some(err);
        self
    }

    /// Goal and term-goal queries for `line` each take `delay` to answer.
    pub fn delay_line(self, line: u32, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(line, delay);
        self
    }

    pub fn with_message(mut self, line: u32, message: &str) -> Self {
        let start = LineCol { line, character: 0 };
        self.messages.push(Diagnostic::new(
            DiagnosticSeverity::Error,
            message.to_string(),
            Range::new(start, start),
            "lean".to_string(),
        ));
        self
    }

    pub fn push_goal_error(&self, err: BackendError) {
        self.goal_errors.lock().unwrap().push_back(err);
    }

    pub fn goal_calls(&self) -> usize {
        self.goal_calls.load(Ordering::SeqCst)
    }

    pub fn term_calls(&self) -> usize {
        self.term_calls.load(Ordering::SeqCst)
    }

    pub fn queried(&self) -> Vec<Position> {
        self.queried.lock().unwrap().clone()
    }

    async fn answer_goal_query(&self, position: &Position) -> Result<(), BackendError> {
        self.goal_calls.fetch_add(1, Ordering::SeqCst);
        self.queried.lock().unwrap().push(position.clone());
        let delay = self.delays.lock().unwrap().get(&position.line()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let err = self.goal_errors.lock().unwrap().pop_front();
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn answer_term_query(&self, position: &Position) -> Result<(), BackendError> {
        self.term_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(&position.line()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let err = self.term_goal_error.lock().unwrap().clone();
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl InfoBackend for FakeBackend {
    fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    async fn goals(&self, position: &Position) -> Result<Option<GoalList>, BackendError> {
        self.answer_goal_query(position).await?;
        Ok(Some(GoalList {
            goals: vec![Goal::preformatted(goal_text(position.line()))],
        }))
    }

    async fn term_goal(&self, position: &Position) -> Result<Option<TermGoal>, BackendError> {
        self.answer_term_query(position).await?;
        Ok(Some(TermGoal {
            goal: Goal::preformatted(term_text(position.line())),
            range: None,
        }))
    }

    async fn widgets(&self, position: &Position) -> Result<Vec<WidgetInstance>, BackendError> {
        let err = self.widget_error.lock().unwrap().clone();
        if let Some(err) = err {
            return Err(err);
        }
        Ok(vec![WidgetInstance {
            id: format!("widget@{}", position.line()),
            javascript_hash: serde_json::json!("0"),
            props: serde_json::Value::Null,
            range: None,
        }])
    }

    async fn plain_goal(&self, position: &Position) -> Result<Option<PlainGoal>, BackendError> {
        self.answer_goal_query(position).await?;
        let text = goal_text(position.line());
        Ok(Some(PlainGoal {
            rendered: format!("```lean\n{text}\n```"),
            goals: vec![text],
        }))
    }

    async fn plain_term_goal(
        &self,
        position: &Position,
    ) -> Result<Option<PlainTermGoal>, BackendError> {
        self.answer_term_query(position).await?;
        Ok(Some(PlainTermGoal {
            goal: term_text(position.line()),
            range: None,
        }))
    }

    async fn messages_at(&self, position: &Position) -> Vec<Diagnostic> {
        self.messages
            .iter()
            .filter(|d| d.range().starts_on_line(position.line()))
            .cloned()
            .collect()
    }
}
